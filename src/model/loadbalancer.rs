use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

/// How much of the VCN security lists the reconciler is allowed to touch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityListMode {
    /// Load balancer ingress/egress and node ingress rules.
    #[default]
    #[serde(alias = "All", alias = "all", alias = "Managed")]
    Managed,
    /// Load balancer ingress rules only.
    #[serde(alias = "Frontend")]
    Frontend,
    #[serde(alias = "None")]
    None,
}

impl SecurityListMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "managed" | "all" => Some(Self::Managed),
            "frontend" => Some(Self::Frontend),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backend {
    pub ip_address: String,
    pub port: u16,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

impl Backend {
    pub fn new(ip_address: impl Into<String>, port: u16) -> Self {
        Self {
            ip_address: ip_address.into(),
            port,
            weight: 1,
        }
    }

    /// Backend identity; weight and health are not part of it.
    pub fn key(&self) -> (&str, u16) {
        (self.ip_address.as_str(), self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthChecker {
    pub protocol: String,
    pub url_path: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendSetDesc {
    pub name: String,
    pub policy: String,
    pub health_checker: HealthChecker,
    #[serde(default)]
    pub backends: Vec<Backend>,
}

impl BackendSetDesc {
    /// Port the backends listen on; `None` when the set is empty.
    pub fn backend_port(&self) -> Option<u16> {
        self.backends.first().map(|b| b.port)
    }

    pub fn backend_ips(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.ip_address.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerDesc {
    pub name: String,
    pub protocol: String,
    pub port: u16,
    pub default_backend_set_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_certificate_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_secs: Option<u64>,
}

/// SSL material installed on a load balancer.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertBundle {
    pub certificate_name: String,
    pub public_certificate: String,
    pub private_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_certificate: Option<String>,
}

impl fmt::Debug for CertBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertBundle")
            .field("certificate_name", &self.certificate_name)
            .field("public_certificate", &self.public_certificate.len())
            .field("private_key", &"<redacted>")
            .field("ca_certificate", &self.ca_certificate.as_ref().map(String::len))
            .finish()
    }
}

/// Ports a single service port maps to on the load balancer and the nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortSpec {
    pub listener_port: u16,
    pub backend_port: u16,
    pub health_check_port: u16,
}

/// Desired load balancer state for one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LbSpec {
    pub name: String,
    pub shape: String,
    pub internal: bool,
    pub subnets: Vec<String>,
    pub backend_sets: BTreeMap<String, BackendSetDesc>,
    pub listeners: BTreeMap<String, ListenerDesc>,
    pub ssl_config: BTreeMap<u16, CertBundle>,
    pub source_cidrs: Vec<String>,
    /// Keyed by backend set name.
    pub ports: BTreeMap<String, PortSpec>,
    pub security_list_mode: SecurityListMode,
}

impl LbSpec {
    /// Certificates referenced by the desired listeners, keyed by name.
    pub fn certificates(&self) -> BTreeMap<String, CertBundle> {
        self.ssl_config
            .values()
            .map(|bundle| (bundle.certificate_name.clone(), bundle.clone()))
            .collect()
    }

    pub fn backend_ips(&self) -> Vec<String> {
        let mut ips: Vec<String> = self
            .backend_sets
            .values()
            .flat_map(BackendSetDesc::backend_ips)
            .collect();
        ips.sort();
        ips.dedup();
        ips
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub certificate_name: String,
    #[serde(default)]
    pub public_certificate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_certificate: Option<String>,
}

impl From<&CertBundle> for Certificate {
    fn from(bundle: &CertBundle) -> Self {
        Self {
            certificate_name: bundle.certificate_name.clone(),
            public_certificate: bundle.public_certificate.clone(),
            ca_certificate: bundle.ca_certificate.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpAddress {
    pub ip_address: String,
    #[serde(default)]
    pub is_public: bool,
}

/// A load balancer as reported by the cloud.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancer {
    pub id: String,
    pub display_name: String,
    pub shape_name: String,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub subnet_ids: Vec<String>,
    #[serde(default)]
    pub ip_addresses: Vec<IpAddress>,
    #[serde(default)]
    pub backend_sets: BTreeMap<String, BackendSetDesc>,
    #[serde(default)]
    pub listeners: BTreeMap<String, ListenerDesc>,
    #[serde(default)]
    pub certificates: BTreeMap<String, Certificate>,
}

impl LoadBalancer {
    pub fn backend_ips(&self) -> Vec<String> {
        let mut ips: Vec<String> = self
            .backend_sets
            .values()
            .flat_map(BackendSetDesc::backend_ips)
            .collect();
        ips.sort();
        ips.dedup();
        ips
    }

    /// Listener port serving the given backend set, falling back to the
    /// port encoded in the `{protocol}-{port}` name.
    pub fn listener_port_for(&self, backend_set: &str) -> Option<u16> {
        self.listeners
            .values()
            .find(|l| l.default_backend_set_name == backend_set)
            .map(|l| l.port)
            .or_else(|| {
                backend_set
                    .rsplit_once('-')
                    .and_then(|(_, port)| port.parse().ok())
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLoadBalancerDetails {
    pub compartment_id: String,
    pub display_name: String,
    pub shape_name: String,
    pub subnet_ids: Vec<String>,
    pub is_private: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkRequestState {
    Accepted,
    InProgress,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkRequest {
    pub id: String,
    pub load_balancer_id: String,
    pub lifecycle_state: WorkRequestState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
