use serde::{Deserialize, Serialize};

/// IANA protocol number for TCP, as the security list API expects it.
pub const PROTOCOL_TCP: &str = "6";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subnet {
    pub id: String,
    pub cidr_block: String,
    #[serde(default)]
    pub security_list_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub min: u16,
    pub max: u16,
}

impl PortRange {
    pub fn single(port: u16) -> Self {
        Self {
            min: port,
            max: port,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_port_range: Option<PortRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_port_range: Option<PortRange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressRule {
    pub source: String,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_options: Option<TcpOptions>,
    #[serde(default)]
    pub is_stateless: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EgressRule {
    pub destination: String,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_options: Option<TcpOptions>,
    #[serde(default)]
    pub is_stateless: bool,
}

fn tcp_to_port(port: u16) -> Option<TcpOptions> {
    Some(TcpOptions {
        destination_port_range: Some(PortRange::single(port)),
        source_port_range: None,
    })
}

/// True when the rule is a TCP rule for exactly `port` with no source port
/// restriction, i.e. the shape of every rule the reconciler writes.
fn targets_port(protocol: &str, tcp_options: Option<&TcpOptions>, port: u16) -> bool {
    protocol == PROTOCOL_TCP
        && tcp_options.is_some_and(|opts| {
            opts.source_port_range.is_none()
                && opts.destination_port_range == Some(PortRange::single(port))
        })
}

impl IngressRule {
    pub fn tcp(source: impl Into<String>, port: u16) -> Self {
        Self {
            source: source.into(),
            protocol: PROTOCOL_TCP.to_string(),
            tcp_options: tcp_to_port(port),
            is_stateless: false,
        }
    }

    pub fn matches(&self, source: &str, port: u16) -> bool {
        self.source == source && self.targets(port)
    }

    pub fn targets(&self, port: u16) -> bool {
        targets_port(&self.protocol, self.tcp_options.as_ref(), port)
    }
}

impl EgressRule {
    pub fn tcp(destination: impl Into<String>, port: u16) -> Self {
        Self {
            destination: destination.into(),
            protocol: PROTOCOL_TCP.to_string(),
            tcp_options: tcp_to_port(port),
            is_stateless: false,
        }
    }

    pub fn matches(&self, destination: &str, port: u16) -> bool {
        self.destination == destination && self.targets(port)
    }

    pub fn targets(&self, port: u16) -> bool {
        targets_port(&self.protocol, self.tcp_options.as_ref(), port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityList {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default)]
    pub ingress_security_rules: Vec<IngressRule>,
    #[serde(default)]
    pub egress_security_rules: Vec<EgressRule>,
}
