use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use indoc::{formatdoc, indoc};
use pretty_assertions::assert_eq;

use oci_lb_controller::{
    cloud::{CloudCall, FakeCloud, FakeCloudState, Operation},
    config::ProviderConfig,
    error::{Error, ErrorKind, Result},
    loadbalancer::{
        certificate_name, load_balancer_name, ReconcileContext, Reconciler, SecretReader,
        ServiceLister,
    },
    model::{NodeAddress, NodeInfo, SecurityList, ServiceRequest, Subnet},
};

#[derive(Default)]
struct Secrets(Mutex<BTreeMap<String, BTreeMap<String, Vec<u8>>>>);

impl Secrets {
    fn put(&self, key: &str, cert: &str, private_key: &str) {
        self.0.lock().unwrap().insert(
            key.to_string(),
            BTreeMap::from([
                ("tls.crt".to_string(), cert.as_bytes().to_vec()),
                ("tls.key".to_string(), private_key.as_bytes().to_vec()),
            ]),
        );
    }
}

#[async_trait]
impl SecretReader for Secrets {
    async fn read_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>> {
        Ok(self
            .0
            .lock()
            .unwrap()
            .get(&format!("{namespace}/{name}"))
            .cloned())
    }
}

#[derive(Default)]
struct Services {
    items: Mutex<Vec<ServiceRequest>>,
    unavailable: AtomicBool,
}

impl Services {
    fn put(&self, svc: &ServiceRequest) {
        let mut items = self.items.lock().unwrap();
        items.retain(|s| s.key() != svc.key());
        items.push(svc.clone());
    }

    fn forget(&self, svc: &ServiceRequest) {
        self.items.lock().unwrap().retain(|s| s.key() != svc.key());
    }
}

#[async_trait]
impl ServiceLister for Services {
    async fn load_balancer_services(&self) -> Result<Vec<ServiceRequest>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Transient("services unavailable".into()));
        }

        Ok(self.items.lock().unwrap().clone())
    }
}

struct Harness {
    cloud: Arc<FakeCloud>,
    secrets: Arc<Secrets>,
    services: Arc<Services>,
    reconciler: Reconciler<Arc<FakeCloud>, Arc<Secrets>, Arc<Services>>,
}

fn config() -> ProviderConfig {
    let mut config = ProviderConfig::default();
    config.global.compartment = "ocid1.compartment.oc1..c".into();
    config.global.region = "us-phoenix-1".into();
    config.load_balancer.subnet1 = Some("sub-A".into());
    config.complete();
    config
}

fn empty_list(id: &str) -> SecurityList {
    SecurityList {
        id: id.into(),
        etag: None,
        ingress_security_rules: vec![],
        egress_security_rules: vec![],
    }
}

fn cloud_state() -> FakeCloudState {
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
            Subnet {
                id: "sub-C".into(),
                cidr_block: "10.2.0.0/16".into(),
                security_list_ids: vec!["sl-C".into()],
            },
        ],
        security_lists: vec![empty_list("sl-A"), empty_list("sl-B"), empty_list("sl-C")],
        load_balancers: vec![],
    }
}

impl Harness {
    fn new() -> Self {
        let cloud = Arc::new(FakeCloud::new(cloud_state()));
        let secrets = Arc::new(Secrets::default());
        let services = Arc::new(Services::default());
        let reconciler =
            Reconciler::new(cloud.clone(), secrets.clone(), services.clone(), config());

        Self {
            cloud,
            secrets,
            services,
            reconciler,
        }
    }

    fn lb_id(&self, svc: &ServiceRequest) -> String {
        self.cloud
            .load_balancer_by_name(&load_balancer_name("", svc))
            .map(|lb| lb.id)
            .unwrap_or_default()
    }

    /// Mutating calls since the last call, rendered with the load balancer
    /// id replaced by `lb`.
    fn take_mutations(&self, lb_id: &str) -> Vec<String> {
        let calls = self
            .cloud
            .mutating_calls()
            .iter()
            .map(|c| c.to_string().replace(lb_id, "lb"))
            .collect();
        self.cloud.clear_calls();
        calls
    }

    /// Registers the service with the cluster, then ensures it.
    async fn ensure(&self, svc: &ServiceRequest, nodes: &[NodeInfo]) -> Result<Vec<String>> {
        self.services.put(svc);
        self.reconciler
            .ensure(&ReconcileContext::default(), svc, nodes)
            .await
            .map(|outcome| {
                outcome
                    .status
                    .ingress
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|i| i.ip)
                    .collect()
            })
    }

    async fn delete(&self, svc: &ServiceRequest) -> Result<()> {
        self.reconciler
            .ensure_deleted(&ReconcileContext::default(), svc)
            .await
    }

    fn rules(&self, id: &str) -> (Vec<String>, Vec<String>) {
        rules(&self.cloud.security_list(id).unwrap())
    }
}

fn node(name: &str, ip: &str) -> NodeInfo {
    NodeInfo {
        name: name.into(),
        addresses: vec![NodeAddress {
            type_: "InternalIP".into(),
            address: ip.into(),
        }],
    }
}

fn service(yaml: &str) -> ServiceRequest {
    serde_yaml::from_str(yaml).unwrap()
}

fn web() -> ServiceRequest {
    service(indoc! {
        "
        name: svc
        namespace: default
        uid: 2f6c1b9a-5c4e-4d8f-a3b2-7e9d0c1f4a65
        sessionAffinity: None
        ports:
        - protocol: TCP
          port: 80
          nodePort: 30080
        "
    })
}

fn web_on(name: &str, uid: &str, node_port: u16) -> ServiceRequest {
    service(&formatdoc! {
        "
        name: {name}
        namespace: default
        uid: {uid}
        sessionAffinity: None
        ports:
        - protocol: TCP
          port: 80
          nodePort: {node_port}
        "
    })
}

fn web_with_ssl() -> ServiceRequest {
    service(indoc! {
        "
        name: svc
        namespace: default
        uid: 2f6c1b9a-5c4e-4d8f-a3b2-7e9d0c1f4a65
        sessionAffinity: None
        ports:
        - protocol: TCP
          port: 80
          nodePort: 30080
        - protocol: TCP
          port: 443
          nodePort: 30443
        annotations:
          service.beta.kubernetes.io/oci-load-balancer-ssl-ports: '443'
          service.beta.kubernetes.io/oci-load-balancer-tls-secret: svc-tls
        "
    })
}

fn rules(list: &SecurityList) -> (Vec<String>, Vec<String>) {
    let port = |opts: Option<&oci_lb_controller::model::TcpOptions>| {
        opts.and_then(|o| o.destination_port_range)
            .map(|r| r.min)
            .unwrap_or_default()
    };

    (
        list.ingress_security_rules
            .iter()
            .map(|r| format!("{}:{}", r.source, port(r.tcp_options.as_ref())))
            .collect(),
        list.egress_security_rules
            .iter()
            .map(|r| format!("{}:{}", r.destination, port(r.tcp_options.as_ref())))
            .collect(),
    )
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn service_lifecycle() {
    let h = Harness::new();
    let svc = web();
    let name = load_balancer_name("", &svc);

    // create
    let ips = h.ensure(&svc, &[node("n1", "10.0.0.1")]).await.unwrap();
    assert_eq!(ips.len(), 1);

    let lb_id = h.lb_id(&svc);
    assert_eq!(
        h.cloud.calls().first(),
        Some(&CloudCall::GetLoadBalancerByName(name.clone()))
    );
    assert_eq!(
        h.take_mutations(&lb_id),
        vec![
            format!("CreateLoadBalancer({name}, 100Mbps, [sub-A], internal=false)"),
            "UpdateSecurityList(sl-B, ingress=[10.1.0.0/16:30080, 10.1.0.0/16:10256], egress=[])"
                .to_string(),
            "UpdateSecurityList(sl-A, ingress=[0.0.0.0/0:80], egress=[10.0.0.0/16:30080, 10.0.0.0/16:10256])"
                .to_string(),
            "CreateBackendSet(lb, TCP-80, backends=[10.0.0.1:30080])".to_string(),
            "CreateListener(lb, TCP-80, :80, default=TCP-80)".to_string(),
        ]
    );

    // idempotent
    h.ensure(&svc, &[node("n1", "10.0.0.1")]).await.unwrap();
    assert_eq!(h.take_mutations(&lb_id), Vec::<String>::new());

    // scale out
    let nodes = [node("n1", "10.0.0.1"), node("n2", "10.0.0.2")];
    h.ensure(&svc, &nodes).await.unwrap();
    assert_eq!(
        h.take_mutations(&lb_id),
        strings(&["UpdateBackendSet(lb, TCP-80, backends=[10.0.0.1:30080, 10.0.0.2:30080])"])
    );

    // add an SSL port
    h.secrets.put("default/svc-tls", "CERT-1", "KEY-1");
    let d1 = certificate_name("CERT-1", "KEY-1", None);
    let svc = web_with_ssl();

    h.ensure(&svc, &nodes).await.unwrap();
    assert_eq!(
        h.take_mutations(&lb_id),
        vec![
            format!("CreateCertificate(lb, name={d1})"),
            "UpdateSecurityList(sl-B, ingress=[10.1.0.0/16:30080, 10.1.0.0/16:10256, 10.1.0.0/16:30443], egress=[])"
                .to_string(),
            "UpdateSecurityList(sl-A, ingress=[0.0.0.0/0:80, 0.0.0.0/0:443], egress=[10.0.0.0/16:30080, 10.0.0.0/16:10256, 10.0.0.0/16:30443])"
                .to_string(),
            "CreateBackendSet(lb, TCP-443, backends=[10.0.0.1:30443, 10.0.0.2:30443])"
                .to_string(),
            format!("CreateListener(lb, TCP-443-{d1}, :443, default=TCP-443)"),
        ]
    );

    // rotate the certificate
    h.secrets.put("default/svc-tls", "CERT-2", "KEY-2");
    let d2 = certificate_name("CERT-2", "KEY-2", None);

    h.ensure(&svc, &nodes).await.unwrap();
    assert_eq!(
        h.take_mutations(&lb_id),
        vec![
            format!("CreateCertificate(lb, name={d2})"),
            format!("CreateListener(lb, TCP-443-{d2}, :443, default=TCP-443)"),
            format!("DeleteListener(lb, TCP-443-{d1})"),
        ]
    );
    let lb = h.cloud.load_balancer_by_name(&name).unwrap();
    assert!(lb.certificates.contains_key(&d1));
    assert!(lb.certificates.contains_key(&d2));

    // delete
    h.delete(&svc).await.unwrap();

    let calls = h.cloud.calls();
    assert_eq!(calls.first(), Some(&CloudCall::GetLoadBalancerByName(name.clone())));
    assert!(matches!(calls.last(), Some(CloudCall::GetWorkRequest(_))));

    let mutations = h.take_mutations(&lb_id);
    assert_eq!(mutations.len(), 5);
    assert!(mutations[..4]
        .iter()
        .all(|c| c.starts_with("UpdateSecurityList(")));
    assert_eq!(mutations[4], "DeleteLoadBalancer(lb)");

    assert_eq!(h.cloud.load_balancer_by_name(&name), None);
    for id in ["sl-A", "sl-B"] {
        assert_eq!(h.rules(id), (vec![], vec![]), "{id}");
    }

    // already gone
    h.delete(&svc).await.unwrap();
    assert_eq!(h.take_mutations(&lb_id), Vec::<String>::new());
}

#[tokio::test]
async fn security_list_failure_converges_on_next_pass() {
    let h = Harness::new();
    let svc = web();
    let nodes = [node("n1", "10.0.0.1")];

    h.cloud.fail_next(
        Operation::UpdateSecurityList,
        Error::Transient("503 Service Unavailable".into()),
    );

    let err = h.ensure(&svc, &nodes).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransientError);

    let lb_id = h.lb_id(&svc);
    let mutations = h.take_mutations(&lb_id);
    assert_eq!(mutations.len(), 3);
    assert!(mutations[0].starts_with("CreateLoadBalancer("));
    assert!(mutations[1].starts_with("UpdateSecurityList(sl-B,"));
    assert_eq!(
        mutations[2],
        "CreateBackendSet(lb, TCP-80, backends=[10.0.0.1:30080])"
    );

    h.ensure(&svc, &nodes).await.unwrap();

    // the failed list is read again before being written
    assert!(h
        .cloud
        .calls()
        .contains(&CloudCall::GetSecurityList("sl-B".into())));
    assert_eq!(
        h.take_mutations(&lb_id),
        strings(&[
            "UpdateSecurityList(sl-B, ingress=[10.1.0.0/16:30080, 10.1.0.0/16:10256], egress=[])",
            "UpdateSecurityList(sl-A, ingress=[0.0.0.0/0:80], egress=[10.0.0.0/16:30080, 10.0.0.0/16:10256])",
            "CreateListener(lb, TCP-80, :80, default=TCP-80)",
        ])
    );

    h.ensure(&svc, &nodes).await.unwrap();
    assert_eq!(h.take_mutations(&lb_id), Vec::<String>::new());
}

#[tokio::test]
async fn shared_listener_port_survives_deleting_one_service() {
    let h = Harness::new();
    let nodes = [node("n1", "10.0.0.1")];
    let a = web_on("a", "7b1d2c3e-0000-4000-8000-00000000000a", 30080);
    let b = web_on("b", "7b1d2c3e-0000-4000-8000-00000000000b", 30081);

    h.ensure(&a, &nodes).await.unwrap();
    h.ensure(&b, &nodes).await.unwrap();

    h.delete(&a).await.unwrap();
    h.services.forget(&a);

    assert_eq!(
        h.rules("sl-A"),
        (
            strings(&["0.0.0.0/0:80"]),
            strings(&["10.0.0.0/16:10256", "10.0.0.0/16:30081"])
        )
    );
    assert_eq!(
        h.rules("sl-B"),
        (strings(&["10.1.0.0/16:10256", "10.1.0.0/16:30081"]), vec![])
    );

    h.delete(&b).await.unwrap();

    for id in ["sl-A", "sl-B"] {
        assert_eq!(h.rules(id), (vec![], vec![]), "{id}");
    }
}

#[tokio::test]
async fn unknown_services_keep_shared_rules_on_delete() {
    let h = Harness::new();
    let svc = web();

    h.ensure(&svc, &[node("n1", "10.0.0.1")]).await.unwrap();

    h.services.unavailable.store(true, Ordering::SeqCst);
    h.delete(&svc).await.unwrap();

    assert_eq!(
        h.rules("sl-A"),
        (strings(&["0.0.0.0/0:80"]), strings(&["10.0.0.0/16:10256"]))
    );
    assert_eq!(h.rules("sl-B"), (strings(&["10.1.0.0/16:10256"]), vec![]));
}

#[tokio::test]
async fn source_range_change_replaces_ingress_rule() {
    let h = Harness::new();
    let nodes = [node("n1", "10.0.0.1")];
    let mut svc = web();

    h.ensure(&svc, &nodes).await.unwrap();
    let lb_id = h.lb_id(&svc);
    h.take_mutations(&lb_id);

    svc.annotations.insert(
        "service.beta.kubernetes.io/load-balancer-source-ranges".into(),
        "10.20.0.0/16".into(),
    );

    h.ensure(&svc, &nodes).await.unwrap();
    assert_eq!(
        h.take_mutations(&lb_id),
        strings(&[
            "UpdateSecurityList(sl-A, ingress=[10.20.0.0/16:80], egress=[10.0.0.0/16:30080, 10.0.0.0/16:10256])"
        ])
    );

    h.ensure(&svc, &nodes).await.unwrap();
    assert_eq!(h.take_mutations(&lb_id), Vec::<String>::new());
}

#[tokio::test]
async fn scale_in_clears_rules_of_abandoned_subnet() {
    let h = Harness::new();
    let svc = web();

    h.ensure(&svc, &[node("n1", "10.0.0.1"), node("n3", "10.2.0.1")])
        .await
        .unwrap();
    let lb_id = h.lb_id(&svc);
    h.take_mutations(&lb_id);

    assert_eq!(
        h.rules("sl-C"),
        (strings(&["10.1.0.0/16:30080", "10.1.0.0/16:10256"]), vec![])
    );

    h.ensure(&svc, &[node("n1", "10.0.0.1")]).await.unwrap();

    assert_eq!(
        h.take_mutations(&lb_id),
        strings(&[
            "UpdateBackendSet(lb, TCP-80, backends=[10.0.0.1:30080])",
            "UpdateSecurityList(sl-A, ingress=[0.0.0.0/0:80], egress=[10.0.0.0/16:30080, 10.0.0.0/16:10256])",
            "UpdateSecurityList(sl-C, ingress=[], egress=[])",
        ])
    );
}

#[tokio::test]
async fn health_check_node_port_is_opened() {
    let h = Harness::new();
    let mut svc = web();
    svc.health_check_node_port = Some(32000);

    h.ensure(&svc, &[node("n1", "10.0.0.1")]).await.unwrap();

    assert_eq!(
        h.rules("sl-B"),
        (strings(&["10.1.0.0/16:30080", "10.1.0.0/16:32000"]), vec![])
    );
    assert_eq!(
        h.rules("sl-A").1,
        strings(&["10.0.0.0/16:30080", "10.0.0.0/16:32000"])
    );
}

#[tokio::test]
async fn empty_node_list_creates_empty_backend_set() {
    let h = Harness::new();
    let svc = web();

    h.ensure(&svc, &[]).await.unwrap();

    let lb_id = h.lb_id(&svc);
    let mutations = h.take_mutations(&lb_id);
    assert_eq!(
        mutations[1..],
        strings(&[
            "UpdateSecurityList(sl-A, ingress=[0.0.0.0/0:80], egress=[])",
            "CreateBackendSet(lb, TCP-80, backends=[])",
            "CreateListener(lb, TCP-80, :80, default=TCP-80)",
        ])
    );
}

#[tokio::test]
async fn service_without_ports_gets_bare_load_balancer() {
    let h = Harness::new();
    let mut svc = web();
    svc.ports.clear();

    h.ensure(&svc, &[node("n1", "10.0.0.1")]).await.unwrap();

    let mutations = h.take_mutations(&h.lb_id(&svc));
    assert_eq!(mutations.len(), 1);
    assert!(mutations[0].starts_with("CreateLoadBalancer("));
}

#[tokio::test]
async fn rejected_services_make_no_cloud_calls() {
    let h = Harness::new();

    let udp = service(indoc! {
        "
        name: dns
        namespace: default
        uid: 0d1e2f3a-4b5c-6d7e-8f90-a1b2c3d4e5f6
        sessionAffinity: None
        ports:
        - protocol: UDP
          port: 53
          nodePort: 30053
        "
    });
    let err = h.ensure(&udp, &[node("n1", "10.0.0.1")]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedProtocol);

    let mut fixed_ip = web();
    fixed_ip.load_balancer_ip = Some("203.0.113.7".into());
    let err = h
        .ensure(&fixed_ip, &[node("n1", "10.0.0.1")])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedConfig);

    assert_eq!(h.cloud.calls(), vec![]);
}

#[tokio::test]
async fn missing_tls_secret_fails_before_cloud_calls() {
    let h = Harness::new();

    let err = h
        .ensure(&web_with_ssl(), &[node("n1", "10.0.0.1")])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::CertificateUnavailable);
    assert_eq!(h.cloud.calls(), vec![]);
}

#[tokio::test]
async fn load_balancer_without_ip_is_incomplete() {
    let h = Harness::new();
    h.cloud.omit_ip_addresses();

    let err = h.ensure(&web(), &[node("n1", "10.0.0.1")]).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::IncompleteState);
}

#[tokio::test]
async fn failed_work_request_is_surfaced() {
    let h = Harness::new();
    h.cloud
        .fail_next_work_request(Operation::CreateBackendSet, "InvalidParameter", "bad port");

    let err = h.ensure(&web(), &[node("n1", "10.0.0.1")]).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::WorkRequestFailed);
    assert!(err.to_string().contains("InvalidParameter"));

    let mutations = h.take_mutations(&h.lb_id(&web()));
    assert!(!mutations.iter().any(|c| c.starts_with("CreateListener(")));
}

#[tokio::test]
async fn drift_of_immutable_fields_is_a_warning() {
    let h = Harness::new();
    let svc = web();
    let nodes = [node("n1", "10.0.0.1")];

    h.ensure(&svc, &nodes).await.unwrap();

    let mut bigger = svc.clone();
    bigger.annotations.insert(
        "service.beta.kubernetes.io/oci-load-balancer-shape".into(),
        "400Mbps".into(),
    );

    let outcome = h
        .reconciler
        .ensure(&ReconcileContext::default(), &bigger, &nodes)
        .await
        .unwrap();

    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("400Mbps"));
}

#[tokio::test]
async fn cancelled_context_stops_before_any_call() {
    let h = Harness::new();
    let ctx = ReconcileContext::default();
    ctx.cancellation_token().cancel();

    let err = h
        .reconciler
        .ensure(&ctx, &web(), &[node("n1", "10.0.0.1")])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(h.cloud.calls(), vec![]);
}

#[tokio::test(start_paused = true)]
async fn deadline_aborts_waiting_for_work_request() {
    let h = Harness::new();
    h.cloud.set_pending_polls(1000);

    let ctx = ReconcileContext::default().with_timeout(Duration::from_secs(90));

    let err = h
        .reconciler
        .ensure(&ctx, &web(), &[node("n1", "10.0.0.1")])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(h
        .cloud
        .mutating_calls()
        .iter()
        .all(|c| matches!(c, CloudCall::CreateLoadBalancer { .. })));
}
