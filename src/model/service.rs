use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Node, Service};
use kube::ResourceExt as _;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::error::{Error, Result};

pub const SESSION_AFFINITY_NONE: &str = "None";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, AsRefStr, EnumString,
    Serialize, Deserialize,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub protocol: Protocol,
    pub port: u16,
    pub node_port: u16,
}

/// The parts of a `type: LoadBalancer` Service the reconciler looks at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRequest {
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub session_affinity: String,
    #[serde(
        rename = "loadBalancerIP",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub load_balancer_ip: Option<String>,
    #[serde(default)]
    pub ports: Vec<ServicePort>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub load_balancer_source_ranges: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_node_port: Option<u16>,
}

impl ServiceRequest {
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    /// `namespace/name`, used in log lines.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

fn to_port(value: i32, field: &str, service: &str) -> Result<u16> {
    u16::try_from(value).map_err(|_| {
        Error::InvalidConfig(format!(
            "service {service}: {field} {value} is out of range"
        ))
    })
}

impl TryFrom<&Service> for ServiceRequest {
    type Error = Error;

    fn try_from(svc: &Service) -> Result<Self> {
        let name = svc.name_any();
        let namespace = svc.namespace().unwrap_or_else(|| "default".to_string());
        let uid = svc
            .uid()
            .ok_or_else(|| Error::InvalidConfig(format!("service {namespace}/{name} has no uid")))?;

        let spec = svc.spec.clone().unwrap_or_default();

        let ports = spec
            .ports
            .unwrap_or_default()
            .into_iter()
            .map(|p| {
                let raw = p.protocol.as_deref().unwrap_or("TCP");
                let protocol = raw.parse::<Protocol>().map_err(|_| {
                    Error::UnsupportedProtocol(format!(
                        "service {namespace}/{name}: protocol {raw} is not supported"
                    ))
                })?;

                Ok(ServicePort {
                    name: p.name,
                    protocol,
                    port: to_port(p.port, "port", &name)?,
                    node_port: to_port(p.node_port.unwrap_or_default(), "nodePort", &name)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let health_check_node_port = spec
            .health_check_node_port
            .filter(|port| *port > 0)
            .map(|port| to_port(port, "healthCheckNodePort", &name))
            .transpose()?;

        Ok(Self {
            annotations: svc.annotations().clone(),
            session_affinity: spec
                .session_affinity
                .unwrap_or_else(|| SESSION_AFFINITY_NONE.to_string()),
            load_balancer_ip: spec.load_balancer_ip.filter(|ip| !ip.is_empty()),
            load_balancer_source_ranges: spec.load_balancer_source_ranges.unwrap_or_default(),
            health_check_node_port,
            ports,
            name,
            namespace,
            uid,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAddress {
    #[serde(rename = "type")]
    pub type_: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub name: String,
    #[serde(default)]
    pub addresses: Vec<NodeAddress>,
}

impl NodeInfo {
    pub fn internal_ip(&self) -> Option<&str> {
        self.addresses
            .iter()
            .find(|addr| addr.type_ == "InternalIP")
            .map(|addr| addr.address.as_str())
    }
}

impl From<&Node> for NodeInfo {
    fn from(node: &Node) -> Self {
        let addresses = node
            .status
            .as_ref()
            .and_then(|status| status.addresses.as_ref())
            .map(|addresses| {
                addresses
                    .iter()
                    .map(|addr| NodeAddress {
                        type_: addr.type_.clone(),
                        address: addr.address.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            name: node.name_any(),
            addresses,
        }
    }
}
