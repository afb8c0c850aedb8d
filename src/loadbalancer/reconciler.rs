use k8s_openapi::api::core::v1::{LoadBalancerIngress, LoadBalancerStatus};

use crate::{
    cloud::{CloudClient, WorkRequestId},
    config::ProviderConfig,
    error::{Error, ErrorKind, Result},
    logger,
    model::{
        CreateLoadBalancerDetails, LbSpec, LoadBalancer, NodeInfo, PortSpec, SecurityListMode,
        ServiceRequest,
    },
};

use super::{
    await_work_request,
    certificate::{CertificateStore, SecretReader},
    claims::{PortClaims, ServiceLister},
    diff::{Plan, Step},
    security_list::{RuleRequest, SecurityListManager, SecurityListPolicy},
    spec::{self, backend_set_port, build_lb_spec, load_balancer_name, validate_service},
    PollConfig, ReconcileContext,
};

/// Result of a successful Ensure.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsureOutcome {
    pub status: LoadBalancerStatus,
    /// Non-fatal findings, such as immutable fields that differ from the
    /// service.
    pub warnings: Vec<String>,
}

/// What one Ensure pass works against.
struct Pass<'a> {
    ctx: &'a ReconcileContext,
    policy: SecurityListPolicy<'a>,
    spec: &'a LbSpec,
    lb: &'a LoadBalancer,
    claims: &'a PortClaims,
}

/// Converges cloud load balancers on the state derived from services.
///
/// Calls for the same service must not overlap; calls for different
/// services may.
pub struct Reconciler<C, S, L> {
    client: C,
    certificates: CertificateStore<S>,
    services: L,
    security_lists: SecurityListManager,
    config: ProviderConfig,
    poll: PollConfig,
}

fn status_of(lb: &LoadBalancer) -> Result<LoadBalancerStatus> {
    if lb.ip_addresses.is_empty() {
        return Err(Error::IncompleteState(format!(
            "load balancer {} has no IP addresses",
            lb.id
        )));
    }

    Ok(LoadBalancerStatus {
        ingress: Some(
            lb.ip_addresses
                .iter()
                .map(|ip| LoadBalancerIngress {
                    ip: Some(ip.ip_address.clone()),
                    ..Default::default()
                })
                .collect(),
        ),
    })
}

fn immutable_drift(spec: &LbSpec, lb: &LoadBalancer) -> Vec<String> {
    let mut warnings = Vec::new();

    if spec.shape != lb.shape_name {
        warnings.push(format!(
            "load balancer {} has shape {} but the service asks for {}; shape cannot change after creation",
            lb.display_name, lb.shape_name, spec.shape
        ));
    }

    if spec.internal != lb.is_private {
        warnings.push(format!(
            "load balancer {} is {} but the service asks for {}; this cannot change after creation",
            lb.display_name,
            if lb.is_private { "internal" } else { "public" },
            if spec.internal { "internal" } else { "public" },
        ));
    }

    let mut desired = spec.subnets.clone();
    let mut actual = lb.subnet_ids.clone();
    desired.sort();
    actual.sort();
    if desired != actual {
        warnings.push(format!(
            "load balancer {} uses subnets [{}] but the service asks for [{}]; subnets cannot change after creation",
            lb.display_name,
            lb.subnet_ids.join(", "),
            spec.subnets.join(", ")
        ));
    }

    warnings
}

/// Listener and backend ports recorded on an actual backend set. Without a
/// listener the port the set was named after is used.
fn actual_ports(lb: &LoadBalancer, backend_set: &str) -> Option<PortSpec> {
    let bs = lb.backend_sets.get(backend_set)?;

    Some(PortSpec {
        listener_port: lb
            .listener_port_for(backend_set)
            .or_else(|| backend_set_port(backend_set))?,
        // only used for node rules, which need backends anyway
        backend_port: bs.backend_port().unwrap_or_default(),
        health_check_port: bs.health_checker.port,
    })
}

fn is_interruption(err: &Error) -> bool {
    matches!(err.kind(), ErrorKind::Cancelled | ErrorKind::Timeout)
}

impl<C, S, L> Reconciler<C, S, L>
where
    C: CloudClient,
    S: SecretReader,
    L: ServiceLister,
{
    pub fn new(client: C, secrets: S, services: L, config: ProviderConfig) -> Self {
        let security_lists = SecurityListManager::new(
            config.load_balancer.security_lists.clone(),
            super::cache::DEFAULT_CACHE_TTL,
        );

        Self {
            client,
            certificates: CertificateStore::new(secrets),
            services,
            security_lists,
            poll: config.work_request.poll_config(),
            config,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Issues one mutating call and waits for its work request.
    async fn apply<F>(&self, ctx: &ReconcileContext, step: &str, call: F) -> Result<()>
    where
        F: std::future::Future<Output = Result<WorkRequestId>>,
    {
        let id = ctx.run(step, call).await?;
        await_work_request(&self.client, ctx, &self.poll, &id).await?;
        Ok(())
    }

    async fn create_load_balancer(&self, ctx: &ReconcileContext, spec: &LbSpec) -> Result<LoadBalancer> {
        logger!(
            info,
            "creating load balancer {} (shape {}, subnets [{}], internal {})",
            spec.name,
            spec.shape,
            spec.subnets.join(", "),
            spec.internal
        );

        let details = CreateLoadBalancerDetails {
            compartment_id: self.config.global.compartment.clone(),
            display_name: spec.name.clone(),
            shape_name: spec.shape.clone(),
            subnet_ids: spec.subnets.clone(),
            is_private: spec.internal,
        };

        let id = ctx
            .run("CreateLoadBalancer", self.client.create_load_balancer(&details))
            .await?;
        let wr = await_work_request(&self.client, ctx, &self.poll, &id).await?;

        ctx.run(
            "GetLoadBalancer",
            self.client.get_load_balancer(&wr.load_balancer_id),
        )
        .await
    }

    async fn find(&self, ctx: &ReconcileContext, name: &str) -> Result<Option<LoadBalancer>> {
        match ctx
            .run(
                "GetLoadBalancerByName",
                self.client.get_load_balancer_by_name(name),
            )
            .await
        {
            Ok(lb) => Ok(Some(lb)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Rules other services hold. Every rule is held when the services
    /// cannot be listed.
    async fn claims(
        &self,
        ctx: &ReconcileContext,
        svc: &ServiceRequest,
        mode: SecurityListMode,
    ) -> Result<PortClaims> {
        if mode == SecurityListMode::None {
            return Ok(PortClaims::default());
        }

        match ctx
            .run("ListServices", self.services.load_balancer_services())
            .await
        {
            Ok(services) => Ok(PortClaims::from_services(&svc.key(), &services)),
            Err(err) if is_interruption(&err) => Err(err),
            Err(err) => {
                logger!(
                    error,
                    "listing services failed, keeping every shared security rule: {err}"
                );
                Ok(PortClaims::everything())
            }
        }
    }

    /// Opens the security lists for traffic to the given desired backend set.
    /// With `converge` rules the set no longer needs are dropped as well.
    async fn reconcile_rules(&self, pass: &Pass<'_>, backend_set: &str, converge: bool) -> Result<()> {
        let Pass {
            ctx,
            policy,
            spec,
            lb,
            claims,
        } = pass;

        let ports = spec.ports.get(backend_set).copied().ok_or_else(|| {
            Error::InvalidConfig(format!("backend set {backend_set} has no port mapping"))
        })?;
        let backends = spec
            .backend_sets
            .get(backend_set)
            .map(|bs| bs.backend_ips())
            .unwrap_or_default();
        let previous_backends = lb
            .backend_sets
            .get(backend_set)
            .map(|bs| bs.backend_ips())
            .unwrap_or_default();

        let request = RuleRequest {
            lb_subnets: &lb.subnet_ids,
            source_cidrs: &spec.source_cidrs,
            ports,
            backends: &backends,
            previous_ports: actual_ports(lb, backend_set),
            previous_backends: &previous_backends,
            claims,
        };

        if converge {
            policy.reconcile_for_update(&self.client, ctx, &request).await
        } else {
            policy.reconcile_for_add(&self.client, ctx, &request).await
        }
    }

    /// Opens the security lists, then issues `call`.
    ///
    /// A rule failure does not hold back the load balancer call; it is
    /// returned once the call has finished. When both fail the call's error
    /// wins.
    async fn apply_with_rules<F>(
        &self,
        pass: &Pass<'_>,
        backend_set: &str,
        step: &str,
        call: F,
    ) -> Result<()>
    where
        F: std::future::Future<Output = Result<WorkRequestId>>,
    {
        let rules = self.reconcile_rules(pass, backend_set, false).await;

        if let Err(err) = &rules {
            if is_interruption(err) {
                return rules;
            }
        }

        self.apply(pass.ctx, step, call).await?;

        rules
    }

    async fn apply_step(&self, pass: &Pass<'_>, step: Step<'_>) -> Result<()> {
        let Pass {
            ctx,
            policy,
            spec,
            lb,
            claims,
        } = pass;

        match step {
            Step::CreateCertificate(cert) => {
                self.apply(
                    ctx,
                    "CreateCertificate",
                    self.client.create_certificate(&lb.id, cert),
                )
                .await
            }
            Step::CreateBackendSet(bs) => {
                self.apply_with_rules(
                    pass,
                    &bs.name,
                    "CreateBackendSet",
                    self.client.create_backend_set(&lb.id, bs),
                )
                .await
            }
            Step::UpdateBackendSet(bs) => {
                self.apply_with_rules(
                    pass,
                    &bs.name,
                    "UpdateBackendSet",
                    self.client.update_backend_set(&lb.id, bs),
                )
                .await
            }
            Step::CreateListener(listener) => {
                self.apply_with_rules(
                    pass,
                    &listener.default_backend_set_name,
                    "CreateListener",
                    self.client.create_listener(&lb.id, listener),
                )
                .await
            }
            Step::UpdateListener(listener) => {
                self.apply_with_rules(
                    pass,
                    &listener.default_backend_set_name,
                    "UpdateListener",
                    self.client.update_listener(&lb.id, listener),
                )
                .await
            }
            Step::DeleteListener(listener) => {
                self.apply(
                    ctx,
                    "DeleteListener",
                    self.client.delete_listener(&lb.id, &listener.name),
                )
                .await
            }
            Step::DeleteBackendSet(bs) => {
                self.apply(
                    ctx,
                    "DeleteBackendSet",
                    self.client.delete_backend_set(&lb.id, &bs.name),
                )
                .await?;

                let Some(ports) = actual_ports(lb, &bs.name) else {
                    logger!(
                        warn,
                        "no listener port known for backend set {}, keeping its rules",
                        bs.name
                    );
                    return Ok(());
                };
                let backends = bs.backend_ips();

                // the health-check port stays open while the service still uses it
                let mut claims = (*claims).clone();
                if spec
                    .ports
                    .values()
                    .any(|p| p.health_check_port == ports.health_check_port)
                {
                    claims.claim_health_check_port(ports.health_check_port);
                }

                policy
                    .reconcile_for_remove(
                        &self.client,
                        ctx,
                        &RuleRequest {
                            lb_subnets: &lb.subnet_ids,
                            source_cidrs: &[],
                            ports,
                            backends: &backends,
                            previous_ports: None,
                            previous_backends: &[],
                            claims: &claims,
                        },
                    )
                    .await
            }
        }
    }

    /// Creates or converges the load balancer of a service.
    pub async fn ensure(
        &self,
        ctx: &ReconcileContext,
        svc: &ServiceRequest,
        nodes: &[NodeInfo],
    ) -> Result<EnsureOutcome> {
        ctx.checkpoint()?;
        validate_service(svc)?;

        let certificate = ctx
            .run("ReadSecret", self.certificates.certificate_for(svc))
            .await?;
        let spec = build_lb_spec(svc, nodes, &self.config, certificate.as_ref())?;

        logger!(info, "ensuring load balancer {} for service {}", spec.name, svc.key());

        let (lb, warnings) = match self.find(ctx, &spec.name).await? {
            Some(lb) => {
                let warnings = immutable_drift(&spec, &lb);
                for warning in &warnings {
                    logger!(warn, "{warning}");
                }
                (lb, warnings)
            }
            None => (self.create_load_balancer(ctx, &spec).await?, Vec::new()),
        };

        let plan = Plan::new(&spec, &lb);
        let claims = self.claims(ctx, svc, spec.security_list_mode).await?;
        let pass = Pass {
            ctx,
            policy: self.security_lists.policy(spec.security_list_mode),
            spec: &spec,
            lb: &lb,
            claims: &claims,
        };

        for step in plan.steps() {
            ctx.checkpoint()?;
            logger!(info, "load balancer {}: {step}", lb.display_name);

            if let Err(err) = self.apply_step(&pass, step).await {
                logger!(error, "load balancer {}: {step} failed: {err}", lb.display_name);
                return Err(err);
            }
        }

        // Source ranges and node subnets change without any plan step.
        for backend_set in spec.backend_sets.keys() {
            ctx.checkpoint()?;

            if let Err(err) = self.reconcile_rules(&pass, backend_set, true).await {
                logger!(
                    error,
                    "load balancer {}: security rules of {backend_set} failed: {err}",
                    lb.display_name
                );
                return Err(err);
            }
        }

        Ok(EnsureOutcome {
            status: status_of(&lb)?,
            warnings,
        })
    }

    /// Same as [`Reconciler::ensure`].
    pub async fn update(
        &self,
        ctx: &ReconcileContext,
        svc: &ServiceRequest,
        nodes: &[NodeInfo],
    ) -> Result<EnsureOutcome> {
        self.ensure(ctx, svc, nodes).await
    }

    /// Current status, or `None` when the service has no load balancer.
    pub async fn status(
        &self,
        ctx: &ReconcileContext,
        svc: &ServiceRequest,
    ) -> Result<Option<LoadBalancerStatus>> {
        let name = load_balancer_name(&self.config.load_balancer.name_prefix, svc);

        self.find(ctx, &name)
            .await?
            .map(|lb| status_of(&lb))
            .transpose()
    }

    /// Removes the security rules of every listener, then the load balancer.
    /// Rules other services hold are kept.
    ///
    /// Rule removal failures keep the load balancer so that the next call
    /// still knows which rules to remove.
    pub async fn ensure_deleted(&self, ctx: &ReconcileContext, svc: &ServiceRequest) -> Result<()> {
        ctx.checkpoint()?;

        let name = load_balancer_name(&self.config.load_balancer.name_prefix, svc);

        let Some(lb) = self.find(ctx, &name).await? else {
            logger!(info, "load balancer {name} for service {} is already gone", svc.key());
            return Ok(());
        };

        logger!(info, "deleting load balancer {} ({}) for service {}", name, lb.id, svc.key());

        // An invalid annotation never let rules be added under its settings.
        let mode = spec::security_list_mode(svc, &self.config)
            .unwrap_or_else(|_| self.config.security_list_mode());
        let claims = self.claims(ctx, svc, mode).await?;
        let policy = self.security_lists.policy(mode);

        for (bs_name, bs) in &lb.backend_sets {
            let Some(ports) = actual_ports(&lb, bs_name) else {
                continue;
            };
            let backends = bs.backend_ips();

            policy
                .reconcile_for_remove(
                    &self.client,
                    ctx,
                    &RuleRequest {
                        lb_subnets: &lb.subnet_ids,
                        source_cidrs: &[],
                        ports,
                        backends: &backends,
                        previous_ports: None,
                        previous_backends: &[],
                        claims: &claims,
                    },
                )
                .await?;
        }

        match ctx
            .run("DeleteLoadBalancer", self.client.delete_load_balancer(&lb.id))
            .await
        {
            Ok(id) => {
                await_work_request(&self.client, ctx, &self.poll, &id).await?;
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        logger!(info, "deleted load balancer {}", lb.id);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;

    use pretty_assertions::assert_eq;

    use crate::model::{BackendSetDesc, HealthChecker, IpAddress, ListenerDesc};

    fn lb() -> LoadBalancer {
        LoadBalancer {
            id: "lb-1".into(),
            display_name: "web-1234".into(),
            shape_name: "100Mbps".into(),
            is_private: false,
            subnet_ids: vec!["sub-A".into(), "sub-C".into()],
            ip_addresses: vec![IpAddress {
                ip_address: "192.0.2.10".into(),
                is_public: true,
            }],
            backend_sets: BTreeMap::new(),
            listeners: BTreeMap::new(),
            certificates: BTreeMap::new(),
        }
    }

    fn spec() -> LbSpec {
        LbSpec {
            name: "web-1234".into(),
            shape: "100Mbps".into(),
            internal: false,
            subnets: vec!["sub-C".into(), "sub-A".into()],
            backend_sets: BTreeMap::new(),
            listeners: BTreeMap::new(),
            ssl_config: BTreeMap::new(),
            source_cidrs: vec!["0.0.0.0/0".into()],
            ports: BTreeMap::new(),
            security_list_mode: Default::default(),
        }
    }

    #[test]
    fn no_drift_when_only_subnet_order_differs() {
        assert_eq!(immutable_drift(&spec(), &lb()), Vec::<String>::new());
    }

    #[test]
    fn drift_is_reported_per_field() {
        let mut spec = spec();
        spec.shape = "400Mbps".into();
        spec.internal = true;
        spec.subnets = vec!["sub-A".into()];

        let warnings = immutable_drift(&spec, &lb());

        assert_eq!(warnings.len(), 3);
        assert!(warnings[0].contains("shape"));
        assert!(warnings[1].contains("internal"));
        assert!(warnings[2].contains("subnets"));
    }

    #[test]
    fn status_lists_ips() {
        let status = status_of(&lb()).unwrap();

        assert_eq!(
            status.ingress,
            Some(vec![LoadBalancerIngress {
                ip: Some("192.0.2.10".into()),
                ..Default::default()
            }])
        );
    }

    #[test]
    fn status_without_ips_is_incomplete() {
        let mut lb = lb();
        lb.ip_addresses.clear();

        assert_eq!(status_of(&lb).unwrap_err().kind(), ErrorKind::IncompleteState);
    }

    #[test]
    fn ports_of_actual_backend_set() {
        let mut lb = lb();
        lb.backend_sets.insert(
            "TCP-443".into(),
            BackendSetDesc {
                name: "TCP-443".into(),
                policy: "ROUND_ROBIN".into(),
                health_checker: HealthChecker {
                    protocol: "HTTP".into(),
                    url_path: "/healthz".into(),
                    port: 10256,
                },
                backends: vec![crate::model::Backend::new("10.0.0.1", 30443)],
            },
        );
        lb.listeners.insert(
            "TCP-443-cert-x".into(),
            ListenerDesc {
                name: "TCP-443-cert-x".into(),
                protocol: "TCP".into(),
                port: 443,
                default_backend_set_name: "TCP-443".into(),
                ssl_certificate_name: Some("cert-x".into()),
                idle_timeout_secs: None,
            },
        );

        assert_eq!(
            actual_ports(&lb, "TCP-443"),
            Some(PortSpec {
                listener_port: 443,
                backend_port: 30443,
                health_check_port: 10256,
            })
        );
        assert_eq!(actual_ports(&lb, "TCP-80"), None);

        lb.listeners.clear();
        assert_eq!(
            actual_ports(&lb, "TCP-443").map(|p| p.listener_port),
            Some(443)
        );
    }
}
