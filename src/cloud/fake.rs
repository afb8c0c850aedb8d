use std::{
    collections::{BTreeMap, VecDeque},
    fmt,
    net::IpAddr,
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::{
    error::{Error, Result},
    logger,
    model::{
        BackendSetDesc, CertBundle, Certificate, CreateLoadBalancerDetails, EgressRule,
        IngressRule, IpAddress, ListenerDesc, LoadBalancer, SecurityList, Subnet, WorkRequest,
        WorkRequestState,
    },
};

use super::{CloudClient, WorkRequestId};

/// Cloud operations, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Operation {
    GetLoadBalancerByName,
    GetLoadBalancer,
    CreateLoadBalancer,
    DeleteLoadBalancer,
    CreateBackendSet,
    UpdateBackendSet,
    DeleteBackendSet,
    CreateListener,
    UpdateListener,
    DeleteListener,
    CreateCertificate,
    GetWorkRequest,
    GetSubnet,
    GetSubnetsForInternalIps,
    GetSecurityList,
    UpdateSecurityList,
}

/// A call the fake received, in the order received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudCall {
    GetLoadBalancerByName(String),
    GetLoadBalancer(String),
    CreateLoadBalancer {
        name: String,
        shape: String,
        subnets: Vec<String>,
        internal: bool,
    },
    DeleteLoadBalancer(String),
    CreateBackendSet {
        lb_id: String,
        name: String,
        backends: Vec<String>,
    },
    UpdateBackendSet {
        lb_id: String,
        name: String,
        backends: Vec<String>,
    },
    DeleteBackendSet {
        lb_id: String,
        name: String,
    },
    CreateListener {
        lb_id: String,
        name: String,
        port: u16,
        default_backend_set: String,
    },
    UpdateListener {
        lb_id: String,
        name: String,
        port: u16,
        default_backend_set: String,
    },
    DeleteListener {
        lb_id: String,
        name: String,
    },
    CreateCertificate {
        lb_id: String,
        name: String,
    },
    GetWorkRequest(String),
    GetSubnet(String),
    GetSubnetsForInternalIps(Vec<String>),
    GetSecurityList(String),
    UpdateSecurityList {
        id: String,
        ingress: Vec<IngressRule>,
        egress: Vec<EgressRule>,
    },
}

impl CloudCall {
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            Self::GetLoadBalancerByName(_)
                | Self::GetLoadBalancer(_)
                | Self::GetWorkRequest(_)
                | Self::GetSubnet(_)
                | Self::GetSubnetsForInternalIps(_)
                | Self::GetSecurityList(_)
        )
    }
}

fn backend_keys(desc: &BackendSetDesc) -> Vec<String> {
    desc.backends
        .iter()
        .map(|b| format!("{}:{}", b.ip_address, b.port))
        .collect()
}

fn rule_port(opts: Option<&crate::model::TcpOptions>) -> String {
    opts.and_then(|o| o.destination_port_range)
        .map(|r| {
            if r.min == r.max {
                r.min.to_string()
            } else {
                format!("{}-{}", r.min, r.max)
            }
        })
        .unwrap_or_else(|| "all".to_string())
}

impl fmt::Display for CloudCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GetLoadBalancerByName(name) => write!(f, "GetLoadBalancerByName({name})"),
            Self::GetLoadBalancer(id) => write!(f, "GetLoadBalancer({id})"),
            Self::CreateLoadBalancer {
                name,
                shape,
                subnets,
                internal,
            } => write!(
                f,
                "CreateLoadBalancer({name}, {shape}, [{}], internal={internal})",
                subnets.join(", ")
            ),
            Self::DeleteLoadBalancer(id) => write!(f, "DeleteLoadBalancer({id})"),
            Self::CreateBackendSet {
                lb_id,
                name,
                backends,
            } => write!(
                f,
                "CreateBackendSet({lb_id}, {name}, backends=[{}])",
                backends.join(", ")
            ),
            Self::UpdateBackendSet {
                lb_id,
                name,
                backends,
            } => write!(
                f,
                "UpdateBackendSet({lb_id}, {name}, backends=[{}])",
                backends.join(", ")
            ),
            Self::DeleteBackendSet { lb_id, name } => write!(f, "DeleteBackendSet({lb_id}, {name})"),
            Self::CreateListener {
                lb_id,
                name,
                port,
                default_backend_set,
            } => write!(
                f,
                "CreateListener({lb_id}, {name}, :{port}, default={default_backend_set})"
            ),
            Self::UpdateListener {
                lb_id,
                name,
                port,
                default_backend_set,
            } => write!(
                f,
                "UpdateListener({lb_id}, {name}, :{port}, default={default_backend_set})"
            ),
            Self::DeleteListener { lb_id, name } => write!(f, "DeleteListener({lb_id}, {name})"),
            Self::CreateCertificate { lb_id, name } => {
                write!(f, "CreateCertificate({lb_id}, name={name})")
            }
            Self::GetWorkRequest(id) => write!(f, "GetWorkRequest({id})"),
            Self::GetSubnet(id) => write!(f, "GetSubnet({id})"),
            Self::GetSubnetsForInternalIps(ips) => {
                write!(f, "GetSubnetsForInternalIPs([{}])", ips.join(", "))
            }
            Self::GetSecurityList(id) => write!(f, "GetSecurityList({id})"),
            Self::UpdateSecurityList {
                id,
                ingress,
                egress,
            } => {
                let ingress = ingress
                    .iter()
                    .map(|r| format!("{}:{}", r.source, rule_port(r.tcp_options.as_ref())))
                    .collect::<Vec<_>>();
                let egress = egress
                    .iter()
                    .map(|r| format!("{}:{}", r.destination, rule_port(r.tcp_options.as_ref())))
                    .collect::<Vec<_>>();
                write!(
                    f,
                    "UpdateSecurityList({id}, ingress=[{}], egress=[{}])",
                    ingress.join(", "),
                    egress.join(", ")
                )
            }
        }
    }
}

/// Seed for [`FakeCloud`]; also the state file format of `oci-lb simulate`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FakeCloudState {
    #[serde(default)]
    pub subnets: Vec<Subnet>,
    #[serde(default)]
    pub security_lists: Vec<SecurityList>,
    #[serde(default)]
    pub load_balancers: Vec<LoadBalancer>,
}

#[derive(Debug, Default)]
struct Inner {
    subnets: BTreeMap<String, Subnet>,
    security_lists: BTreeMap<String, SecurityList>,
    load_balancers: BTreeMap<String, LoadBalancer>,
    work_requests: BTreeMap<String, (WorkRequest, u32)>,
    calls: Vec<CloudCall>,
    failures: VecDeque<(Operation, Error)>,
    failed_work_requests: VecDeque<(Operation, String, String)>,
    pending_polls: u32,
    omit_ip_addresses: bool,
    next_id: u64,
}

impl Inner {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn take_failure(&mut self, op: Operation) -> Result<()> {
        match self.failures.iter().position(|(o, _)| *o == op) {
            Some(i) => match self.failures.remove(i) {
                Some((_, err)) => Err(err),
                None => Ok(()),
            },
            None => Ok(()),
        }
    }

    fn work_request(&mut self, op: Operation, lb_id: &str) -> WorkRequestId {
        let id = format!("ocid1.loadbalancerworkrequest.{}", self.next_id());

        let failure = self
            .failed_work_requests
            .iter()
            .position(|(o, _, _)| *o == op)
            .and_then(|i| self.failed_work_requests.remove(i));

        let wr = match failure {
            Some((_, code, message)) => WorkRequest {
                id: id.clone(),
                load_balancer_id: lb_id.to_string(),
                lifecycle_state: WorkRequestState::Failed,
                error_code: Some(code),
                message: Some(message),
            },
            None => WorkRequest {
                id: id.clone(),
                load_balancer_id: lb_id.to_string(),
                lifecycle_state: WorkRequestState::Succeeded,
                error_code: None,
                message: None,
            },
        };

        self.work_requests
            .insert(id.clone(), (wr, self.pending_polls));

        id
    }

    fn load_balancer_mut(&mut self, id: &str) -> Result<&mut LoadBalancer> {
        self.load_balancers
            .get_mut(id)
            .ok_or_else(|| Error::not_found("load balancer", id))
    }
}

/// In-memory cloud that records every call it receives.
///
/// Mutations take effect immediately; the returned work requests report
/// `IN_PROGRESS` for a configurable number of polls before completing.
/// Referential rules of the real service are enforced: a listener cannot
/// point at a missing backend set, and a backend set still referenced by a
/// listener cannot be deleted.
#[derive(Debug, Default)]
pub struct FakeCloud {
    inner: Mutex<Inner>,
}

impl FakeCloud {
    pub fn new(state: FakeCloudState) -> Self {
        let inner = Inner {
            subnets: state
                .subnets
                .into_iter()
                .map(|s| (s.id.clone(), s))
                .collect(),
            security_lists: state
                .security_lists
                .into_iter()
                .map(|s| (s.id.clone(), s))
                .collect(),
            load_balancers: state
                .load_balancers
                .into_iter()
                .map(|lb| (lb.id.clone(), lb))
                .collect(),
            ..Default::default()
        };

        Self {
            inner: Mutex::new(inner),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn calls(&self) -> Vec<CloudCall> {
        self.lock().calls.clone()
    }

    pub fn mutating_calls(&self) -> Vec<CloudCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.is_mutating())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// The next call of `op` fails with `err` (after being recorded).
    pub fn fail_next(&self, op: Operation, err: Error) {
        self.lock().failures.push_back((op, err));
    }

    /// The work request of the next `op` ends in `FAILED`.
    pub fn fail_next_work_request(
        &self,
        op: Operation,
        code: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.lock()
            .failed_work_requests
            .push_back((op, code.into(), message.into()));
    }

    /// Number of `IN_PROGRESS` polls each new work request reports.
    pub fn set_pending_polls(&self, polls: u32) {
        self.lock().pending_polls = polls;
    }

    /// New load balancers come up without IP addresses.
    pub fn omit_ip_addresses(&self) {
        self.lock().omit_ip_addresses = true;
    }

    pub fn security_list(&self, id: &str) -> Option<SecurityList> {
        self.lock().security_lists.get(id).cloned()
    }

    pub fn load_balancer_by_name(&self, name: &str) -> Option<LoadBalancer> {
        self.lock()
            .load_balancers
            .values()
            .find(|lb| lb.display_name == name)
            .cloned()
    }

    pub fn state(&self) -> FakeCloudState {
        let inner = self.lock();
        FakeCloudState {
            subnets: inner.subnets.values().cloned().collect(),
            security_lists: inner.security_lists.values().cloned().collect(),
            load_balancers: inner.load_balancers.values().cloned().collect(),
        }
    }
}

#[async_trait]
impl CloudClient for FakeCloud {
    async fn get_load_balancer_by_name(&self, name: &str) -> Result<LoadBalancer> {
        let mut inner = self.lock();
        inner
            .calls
            .push(CloudCall::GetLoadBalancerByName(name.to_string()));
        inner.take_failure(Operation::GetLoadBalancerByName)?;

        inner
            .load_balancers
            .values()
            .find(|lb| lb.display_name == name)
            .cloned()
            .ok_or_else(|| Error::not_found("load balancer", name))
    }

    async fn get_load_balancer(&self, id: &str) -> Result<LoadBalancer> {
        let mut inner = self.lock();
        inner.calls.push(CloudCall::GetLoadBalancer(id.to_string()));
        inner.take_failure(Operation::GetLoadBalancer)?;

        inner
            .load_balancers
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("load balancer", id))
    }

    async fn create_load_balancer(
        &self,
        details: &CreateLoadBalancerDetails,
    ) -> Result<WorkRequestId> {
        let mut inner = self.lock();
        inner.calls.push(CloudCall::CreateLoadBalancer {
            name: details.display_name.clone(),
            shape: details.shape_name.clone(),
            subnets: details.subnet_ids.clone(),
            internal: details.is_private,
        });
        inner.take_failure(Operation::CreateLoadBalancer)?;

        let n = inner.next_id();
        let id = format!("ocid1.loadbalancer.{n}");
        let ip_addresses = if inner.omit_ip_addresses {
            vec![]
        } else {
            vec![IpAddress {
                ip_address: format!("192.0.2.{}", n % 250 + 1),
                is_public: !details.is_private,
            }]
        };

        logger!(debug, "fake: created load balancer {id} ({})", details.display_name);

        inner.load_balancers.insert(
            id.clone(),
            LoadBalancer {
                id: id.clone(),
                display_name: details.display_name.clone(),
                shape_name: details.shape_name.clone(),
                is_private: details.is_private,
                subnet_ids: details.subnet_ids.clone(),
                ip_addresses,
                backend_sets: BTreeMap::new(),
                listeners: BTreeMap::new(),
                certificates: BTreeMap::new(),
            },
        );

        Ok(inner.work_request(Operation::CreateLoadBalancer, &id))
    }

    async fn delete_load_balancer(&self, id: &str) -> Result<WorkRequestId> {
        let mut inner = self.lock();
        inner.calls.push(CloudCall::DeleteLoadBalancer(id.to_string()));
        inner.take_failure(Operation::DeleteLoadBalancer)?;

        inner
            .load_balancers
            .remove(id)
            .ok_or_else(|| Error::not_found("load balancer", id))?;

        Ok(inner.work_request(Operation::DeleteLoadBalancer, id))
    }

    async fn create_backend_set(
        &self,
        lb_id: &str,
        desc: &BackendSetDesc,
    ) -> Result<WorkRequestId> {
        let mut inner = self.lock();
        inner.calls.push(CloudCall::CreateBackendSet {
            lb_id: lb_id.to_string(),
            name: desc.name.clone(),
            backends: backend_keys(desc),
        });
        inner.take_failure(Operation::CreateBackendSet)?;

        inner
            .load_balancer_mut(lb_id)?
            .backend_sets
            .insert(desc.name.clone(), desc.clone());

        Ok(inner.work_request(Operation::CreateBackendSet, lb_id))
    }

    async fn update_backend_set(
        &self,
        lb_id: &str,
        desc: &BackendSetDesc,
    ) -> Result<WorkRequestId> {
        let mut inner = self.lock();
        inner.calls.push(CloudCall::UpdateBackendSet {
            lb_id: lb_id.to_string(),
            name: desc.name.clone(),
            backends: backend_keys(desc),
        });
        inner.take_failure(Operation::UpdateBackendSet)?;

        let lb = inner.load_balancer_mut(lb_id)?;
        match lb.backend_sets.get_mut(&desc.name) {
            Some(existing) => *existing = desc.clone(),
            None => return Err(Error::not_found("backend set", &desc.name)),
        }

        Ok(inner.work_request(Operation::UpdateBackendSet, lb_id))
    }

    async fn delete_backend_set(&self, lb_id: &str, name: &str) -> Result<WorkRequestId> {
        let mut inner = self.lock();
        inner.calls.push(CloudCall::DeleteBackendSet {
            lb_id: lb_id.to_string(),
            name: name.to_string(),
        });
        inner.take_failure(Operation::DeleteBackendSet)?;

        let lb = inner.load_balancer_mut(lb_id)?;
        if let Some(listener) = lb
            .listeners
            .values()
            .find(|l| l.default_backend_set_name == name)
        {
            return Err(Error::InvalidConfig(format!(
                "backend set {name} is still used by listener {}",
                listener.name
            )));
        }
        lb.backend_sets
            .remove(name)
            .ok_or_else(|| Error::not_found("backend set", name))?;

        Ok(inner.work_request(Operation::DeleteBackendSet, lb_id))
    }

    async fn create_listener(&self, lb_id: &str, desc: &ListenerDesc) -> Result<WorkRequestId> {
        let mut inner = self.lock();
        inner.calls.push(CloudCall::CreateListener {
            lb_id: lb_id.to_string(),
            name: desc.name.clone(),
            port: desc.port,
            default_backend_set: desc.default_backend_set_name.clone(),
        });
        inner.take_failure(Operation::CreateListener)?;

        let lb = inner.load_balancer_mut(lb_id)?;
        if !lb.backend_sets.contains_key(&desc.default_backend_set_name) {
            return Err(Error::InvalidConfig(format!(
                "listener {} references missing backend set {}",
                desc.name, desc.default_backend_set_name
            )));
        }
        if let Some(cert) = &desc.ssl_certificate_name {
            if !lb.certificates.contains_key(cert) {
                return Err(Error::InvalidConfig(format!(
                    "listener {} references missing certificate {cert}",
                    desc.name
                )));
            }
        }
        lb.listeners.insert(desc.name.clone(), desc.clone());

        Ok(inner.work_request(Operation::CreateListener, lb_id))
    }

    async fn update_listener(&self, lb_id: &str, desc: &ListenerDesc) -> Result<WorkRequestId> {
        let mut inner = self.lock();
        inner.calls.push(CloudCall::UpdateListener {
            lb_id: lb_id.to_string(),
            name: desc.name.clone(),
            port: desc.port,
            default_backend_set: desc.default_backend_set_name.clone(),
        });
        inner.take_failure(Operation::UpdateListener)?;

        let lb = inner.load_balancer_mut(lb_id)?;
        match lb.listeners.get_mut(&desc.name) {
            Some(existing) => *existing = desc.clone(),
            None => return Err(Error::not_found("listener", &desc.name)),
        }

        Ok(inner.work_request(Operation::UpdateListener, lb_id))
    }

    async fn delete_listener(&self, lb_id: &str, name: &str) -> Result<WorkRequestId> {
        let mut inner = self.lock();
        inner.calls.push(CloudCall::DeleteListener {
            lb_id: lb_id.to_string(),
            name: name.to_string(),
        });
        inner.take_failure(Operation::DeleteListener)?;

        inner
            .load_balancer_mut(lb_id)?
            .listeners
            .remove(name)
            .ok_or_else(|| Error::not_found("listener", name))?;

        Ok(inner.work_request(Operation::DeleteListener, lb_id))
    }

    async fn create_certificate(
        &self,
        lb_id: &str,
        bundle: &CertBundle,
    ) -> Result<WorkRequestId> {
        let mut inner = self.lock();
        inner.calls.push(CloudCall::CreateCertificate {
            lb_id: lb_id.to_string(),
            name: bundle.certificate_name.clone(),
        });
        inner.take_failure(Operation::CreateCertificate)?;

        inner
            .load_balancer_mut(lb_id)?
            .certificates
            .entry(bundle.certificate_name.clone())
            .or_insert_with(|| Certificate::from(bundle));

        Ok(inner.work_request(Operation::CreateCertificate, lb_id))
    }

    async fn get_work_request(&self, id: &str) -> Result<WorkRequest> {
        let mut inner = self.lock();
        inner.calls.push(CloudCall::GetWorkRequest(id.to_string()));
        inner.take_failure(Operation::GetWorkRequest)?;

        let (wr, pending) = inner
            .work_requests
            .get_mut(id)
            .ok_or_else(|| Error::not_found("work request", id))?;

        if *pending > 0 {
            *pending -= 1;
            return Ok(WorkRequest {
                lifecycle_state: WorkRequestState::InProgress,
                error_code: None,
                message: None,
                ..wr.clone()
            });
        }

        Ok(wr.clone())
    }

    async fn get_subnet(&self, id: &str) -> Result<Subnet> {
        let mut inner = self.lock();
        inner.calls.push(CloudCall::GetSubnet(id.to_string()));
        inner.take_failure(Operation::GetSubnet)?;

        inner
            .subnets
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("subnet", id))
    }

    async fn get_subnets_for_internal_ips(&self, ips: &[String]) -> Result<Vec<Subnet>> {
        let mut inner = self.lock();
        inner
            .calls
            .push(CloudCall::GetSubnetsForInternalIps(ips.to_vec()));
        inner.take_failure(Operation::GetSubnetsForInternalIps)?;

        let mut found: Vec<Subnet> = Vec::new();
        for ip in ips {
            let Ok(addr) = ip.parse::<IpAddr>() else {
                continue;
            };

            let subnet = inner.subnets.values().find(|s| {
                s.cidr_block
                    .parse::<IpNet>()
                    .is_ok_and(|net| net.contains(&addr))
            });

            if let Some(subnet) = subnet {
                if !found.iter().any(|s| s.id == subnet.id) {
                    found.push(subnet.clone());
                }
            }
        }

        Ok(found)
    }

    async fn get_security_list(&self, id: &str) -> Result<SecurityList> {
        let mut inner = self.lock();
        inner.calls.push(CloudCall::GetSecurityList(id.to_string()));
        inner.take_failure(Operation::GetSecurityList)?;

        inner
            .security_lists
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("security list", id))
    }

    async fn update_security_list(
        &self,
        id: &str,
        etag: Option<&str>,
        ingress: &[IngressRule],
        egress: &[EgressRule],
    ) -> Result<SecurityList> {
        let mut inner = self.lock();
        inner.calls.push(CloudCall::UpdateSecurityList {
            id: id.to_string(),
            ingress: ingress.to_vec(),
            egress: egress.to_vec(),
        });
        inner.take_failure(Operation::UpdateSecurityList)?;

        let n = inner.next_id();
        let list = inner
            .security_lists
            .get_mut(id)
            .ok_or_else(|| Error::not_found("security list", id))?;

        if let (Some(expected), Some(current)) = (etag, list.etag.as_deref()) {
            if expected != current {
                return Err(Error::Transient(format!(
                    "security list {id}: etag {expected} does not match {current}"
                )));
            }
        }

        list.ingress_security_rules = ingress.to_vec();
        list.egress_security_rules = egress.to_vec();
        list.etag = Some(format!("etag-{n}"));

        Ok(list.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn state() -> FakeCloudState {
        FakeCloudState {
            subnets: vec![
                Subnet {
                    id: "sub-A".into(),
                    cidr_block: "10.1.0.0/16".into(),
                    security_list_ids: vec!["sl-A".into()],
                },
                Subnet {
                    id: "sub-B".into(),
                    cidr_block: "10.0.0.0/16".into(),
                    security_list_ids: vec!["sl-B".into()],
                },
            ],
            security_lists: vec![],
            load_balancers: vec![],
        }
    }

    #[tokio::test]
    async fn subnets_for_internal_ips_are_deduplicated() {
        let cloud = FakeCloud::new(state());

        let actual = cloud
            .get_subnets_for_internal_ips(&[
                "10.0.0.1".to_string(),
                "10.0.0.2".to_string(),
                "172.16.0.1".to_string(),
            ])
            .await
            .unwrap();

        assert_eq!(
            actual.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            vec!["sub-B"]
        );
    }

    #[tokio::test]
    async fn injected_failure_is_consumed_once() {
        let cloud = FakeCloud::new(state());
        cloud.fail_next(Operation::GetSubnet, Error::Transient("503".into()));

        assert!(cloud.get_subnet("sub-A").await.unwrap_err().is_transient());
        assert!(cloud.get_subnet("sub-A").await.is_ok());
        assert_eq!(cloud.calls().len(), 2);
    }

    #[tokio::test]
    async fn listener_requires_backend_set() {
        let cloud = FakeCloud::new(state());
        cloud
            .create_load_balancer(&CreateLoadBalancerDetails {
                compartment_id: "c".into(),
                display_name: "svc".into(),
                shape_name: "100Mbps".into(),
                subnet_ids: vec!["sub-A".into()],
                is_private: false,
            })
            .await
            .unwrap();
        let lb = cloud.load_balancer_by_name("svc").unwrap();

        let err = cloud
            .create_listener(
                &lb.id,
                &ListenerDesc {
                    name: "TCP-80".into(),
                    protocol: "TCP".into(),
                    port: 80,
                    default_backend_set_name: "TCP-80".into(),
                    ssl_certificate_name: None,
                    idle_timeout_secs: None,
                },
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidConfig);
    }
}
