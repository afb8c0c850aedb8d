use std::collections::{BTreeMap, BTreeSet};

use ipnet::IpNet;
use sha2::{Digest, Sha256};

use crate::{
    config::ProviderConfig,
    error::{Error, Result},
    model::{
        Backend, BackendSetDesc, CertBundle, HealthChecker, LbSpec, ListenerDesc, NodeInfo,
        PortSpec, Protocol, SecurityListMode, ServiceRequest, SESSION_AFFINITY_NONE,
    },
};

pub const ANNOTATION_LOAD_BALANCER_INTERNAL: &str =
    "service.beta.kubernetes.io/oci-load-balancer-internal";
pub const ANNOTATION_LOAD_BALANCER_SHAPE: &str =
    "service.beta.kubernetes.io/oci-load-balancer-shape";
pub const ANNOTATION_LOAD_BALANCER_SUBNET1: &str =
    "service.beta.kubernetes.io/oci-load-balancer-subnet1";
pub const ANNOTATION_LOAD_BALANCER_SUBNET2: &str =
    "service.beta.kubernetes.io/oci-load-balancer-subnet2";
pub const ANNOTATION_LOAD_BALANCER_SSL_PORTS: &str =
    "service.beta.kubernetes.io/oci-load-balancer-ssl-ports";
pub const ANNOTATION_LOAD_BALANCER_TLS_SECRET: &str =
    "service.beta.kubernetes.io/oci-load-balancer-tls-secret";
pub const ANNOTATION_LOAD_BALANCER_SECURITY_LIST_MANAGEMENT_MODE: &str =
    "service.beta.kubernetes.io/oci-load-balancer-security-list-management-mode";
pub const ANNOTATION_LOAD_BALANCER_BACKEND_PROTOCOL: &str =
    "service.beta.kubernetes.io/oci-load-balancer-backend-protocol";
pub const ANNOTATION_LOAD_BALANCER_CONNECTION_IDLE_TIMEOUT: &str =
    "service.beta.kubernetes.io/oci-load-balancer-connection-idle-timeout";
pub const ANNOTATION_LOAD_BALANCER_SOURCE_RANGES: &str =
    "service.beta.kubernetes.io/load-balancer-source-ranges";

pub const DEFAULT_LOAD_BALANCER_POLICY: &str = "ROUND_ROBIN";
pub const DEFAULT_SOURCE_CIDR: &str = "0.0.0.0/0";
/// kube-proxy health endpoint, used unless the service has its own
/// health check node port.
pub const DEFAULT_HEALTH_CHECK_PORT: u16 = 10256;
pub const HEALTH_CHECK_PATH: &str = "/healthz";

const MAX_LOAD_BALANCER_NAME_LEN: usize = 1024;
const NAME_HASH_LEN: usize = 16;

/// Load balancer display name for a service. Depends only on the service
/// identity, so every pass for the same service finds the same LB.
pub fn load_balancer_name(prefix: &str, svc: &ServiceRequest) -> String {
    let digest = hex::encode(Sha256::digest(svc.uid.as_bytes()));

    format!("{prefix}{}-{}", svc.name, &digest[..NAME_HASH_LEN])
        .chars()
        .take(MAX_LOAD_BALANCER_NAME_LEN)
        .collect()
}

pub fn backend_set_name(protocol: Protocol, port: u16) -> String {
    format!("{protocol}-{port}")
}

/// Service port a backend set was named after.
pub fn backend_set_port(name: &str) -> Option<u16> {
    name.rsplit_once('-')?.1.parse().ok()
}

pub fn listener_name(protocol: &str, port: u16, certificate: Option<&str>) -> String {
    match certificate {
        Some(cert) => format!("{protocol}-{port}-{cert}"),
        None => format!("{protocol}-{port}"),
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|v| !v.is_empty())
}

pub fn is_internal(svc: &ServiceRequest) -> bool {
    svc.annotation(ANNOTATION_LOAD_BALANCER_INTERNAL).is_some()
}

/// Ports listed in the SSL ports annotation.
pub fn ssl_ports(svc: &ServiceRequest) -> Result<BTreeSet<u16>> {
    let Some(value) = svc.annotation(ANNOTATION_LOAD_BALANCER_SSL_PORTS) else {
        return Ok(BTreeSet::new());
    };

    split_list(value)
        .map(|port| {
            port.parse::<u16>().map_err(|_| {
                Error::InvalidConfig(format!(
                    "service {}: invalid SSL port {port:?} in {ANNOTATION_LOAD_BALANCER_SSL_PORTS}",
                    svc.key()
                ))
            })
        })
        .collect()
}

pub fn security_list_mode(svc: &ServiceRequest, config: &ProviderConfig) -> Result<SecurityListMode> {
    match svc.annotation(ANNOTATION_LOAD_BALANCER_SECURITY_LIST_MANAGEMENT_MODE) {
        Some(value) => SecurityListMode::parse(value).ok_or_else(|| {
            Error::InvalidConfig(format!(
                "service {}: invalid security list management mode {value:?}",
                svc.key()
            ))
        }),
        None => Ok(config.security_list_mode()),
    }
}

/// Allowed source ranges, normalized to their network address.
///
/// The service's `loadBalancerSourceRanges` field wins over the annotation.
pub fn source_cidrs(svc: &ServiceRequest) -> Result<Vec<String>> {
    let raw: Vec<&str> = if !svc.load_balancer_source_ranges.is_empty() {
        svc.load_balancer_source_ranges
            .iter()
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
            .collect()
    } else {
        svc.annotation(ANNOTATION_LOAD_BALANCER_SOURCE_RANGES)
            .map(|value| split_list(value).collect())
            .unwrap_or_default()
    };

    if raw.is_empty() {
        return Ok(vec![DEFAULT_SOURCE_CIDR.to_string()]);
    }

    let mut cidrs: Vec<String> = Vec::with_capacity(raw.len());
    for range in raw {
        let net = range.parse::<IpNet>().map_err(|_| {
            Error::InvalidConfig(format!(
                "service {}: {range:?} is not a valid CIDR",
                svc.key()
            ))
        })?;

        let cidr = net.trunc().to_string();
        if !cidrs.contains(&cidr) {
            cidrs.push(cidr);
        }
    }

    Ok(cidrs)
}

fn listener_protocol(svc: &ServiceRequest) -> Result<String> {
    match svc
        .annotation(ANNOTATION_LOAD_BALANCER_BACKEND_PROTOCOL)
        .map(str::trim)
    {
        None | Some("") => Ok("TCP".to_string()),
        Some(value) if value.eq_ignore_ascii_case("tcp") => Ok("TCP".to_string()),
        Some(value) if value.eq_ignore_ascii_case("http") => Ok("HTTP".to_string()),
        Some(value) => Err(Error::InvalidConfig(format!(
            "service {}: backend protocol {value:?} is not supported, expected HTTP or TCP",
            svc.key()
        ))),
    }
}

fn idle_timeout(svc: &ServiceRequest) -> Result<Option<u64>> {
    svc.annotation(ANNOTATION_LOAD_BALANCER_CONNECTION_IDLE_TIMEOUT)
        .map(|value| {
            value.trim().parse::<u64>().map_err(|_| {
                Error::InvalidConfig(format!(
                    "service {}: connection idle timeout {value:?} is not a number of seconds",
                    svc.key()
                ))
            })
        })
        .transpose()
}

fn subnets(svc: &ServiceRequest, config: &ProviderConfig, internal: bool) -> Result<Vec<String>> {
    let annotated = |key: &str| {
        svc.annotation(key)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let subnet1 = annotated(ANNOTATION_LOAD_BALANCER_SUBNET1)
        .or_else(|| config.load_balancer.subnet1.clone());
    let subnet2_annotation = annotated(ANNOTATION_LOAD_BALANCER_SUBNET2);

    if internal {
        if subnet2_annotation.is_some() {
            return Err(Error::InvalidConfig(format!(
                "service {}: an internal load balancer uses a single subnet, remove {ANNOTATION_LOAD_BALANCER_SUBNET2}",
                svc.key()
            )));
        }
        return Ok(subnet1.into_iter().collect());
    }

    let subnet2 = subnet2_annotation.or_else(|| config.load_balancer.subnet2.clone());

    let mut subnets: Vec<String> = Vec::with_capacity(2);
    for subnet in [subnet1, subnet2].into_iter().flatten() {
        if !subnets.contains(&subnet) {
            subnets.push(subnet);
        }
    }

    Ok(subnets)
}

fn backends(nodes: &[NodeInfo], node_port: u16) -> Vec<Backend> {
    let ips: BTreeSet<&str> = nodes.iter().filter_map(NodeInfo::internal_ip).collect();

    ips.into_iter()
        .map(|ip| Backend::new(ip, node_port))
        .collect()
}

/// Checks that need neither nodes nor certificate material, so a service
/// that can never be served fails before any I/O.
pub fn validate_service(svc: &ServiceRequest) -> Result<BTreeSet<u16>> {
    if let Some(port) = svc.ports.iter().find(|p| p.protocol == Protocol::Udp) {
        return Err(Error::UnsupportedProtocol(format!(
            "service {}: port {} uses UDP, only TCP is supported",
            svc.key(),
            port.port
        )));
    }

    if svc.session_affinity != SESSION_AFFINITY_NONE {
        return Err(Error::UnsupportedConfig(format!(
            "service {}: session affinity {:?} is not supported",
            svc.key(),
            svc.session_affinity
        )));
    }

    if let Some(ip) = &svc.load_balancer_ip {
        return Err(Error::UnsupportedConfig(format!(
            "service {}: loadBalancerIP {ip} cannot be requested",
            svc.key()
        )));
    }

    let ssl_ports = ssl_ports(svc)?;
    if let Some(port) = ssl_ports
        .iter()
        .find(|port| !svc.ports.iter().any(|p| p.port == **port))
    {
        return Err(Error::InvalidConfig(format!(
            "service {}: SSL port {port} is not a port of the service",
            svc.key()
        )));
    }

    Ok(ssl_ports)
}

/// Builds the desired load balancer for a service.
///
/// `certificate` is required when the service lists SSL ports; it is the
/// bundle read through the certificate store.
pub fn build_lb_spec(
    svc: &ServiceRequest,
    nodes: &[NodeInfo],
    config: &ProviderConfig,
    certificate: Option<&CertBundle>,
) -> Result<LbSpec> {
    let ssl_ports = validate_service(svc)?;

    let certificate = match (ssl_ports.is_empty(), certificate) {
        (true, _) => None,
        (false, Some(cert)) => Some(cert),
        (false, None) => {
            return Err(Error::InvalidConfig(format!(
                "service {}: SSL ports are set but no certificate is available",
                svc.key()
            )))
        }
    };

    let security_list_mode = security_list_mode(svc, config)?;
    let internal = is_internal(svc);
    let subnets = subnets(svc, config, internal)?;

    if subnets.is_empty() && security_list_mode == SecurityListMode::Managed {
        return Err(Error::InvalidConfig(format!(
            "service {}: no load balancer subnets are configured",
            svc.key()
        )));
    }

    let shape = svc
        .annotation(ANNOTATION_LOAD_BALANCER_SHAPE)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(config.load_balancer.shape.as_str())
        .to_string();

    let listener_protocol = listener_protocol(svc)?;
    let idle_timeout_secs = idle_timeout(svc)?;
    let health_check_port = svc
        .health_check_node_port
        .unwrap_or(DEFAULT_HEALTH_CHECK_PORT);

    let mut backend_sets = BTreeMap::new();
    let mut listeners = BTreeMap::new();
    let mut ssl_config = BTreeMap::new();
    let mut ports = BTreeMap::new();

    for port in &svc.ports {
        let name = backend_set_name(port.protocol, port.port);

        backend_sets.insert(
            name.clone(),
            BackendSetDesc {
                name: name.clone(),
                policy: DEFAULT_LOAD_BALANCER_POLICY.to_string(),
                health_checker: HealthChecker {
                    protocol: "HTTP".to_string(),
                    url_path: HEALTH_CHECK_PATH.to_string(),
                    port: health_check_port,
                },
                backends: backends(nodes, port.node_port),
            },
        );

        let ssl = certificate.filter(|_| ssl_ports.contains(&port.port));
        if let Some(cert) = ssl {
            ssl_config.insert(port.port, cert.clone());
        }

        let listener = ListenerDesc {
            name: listener_name(
                &listener_protocol,
                port.port,
                ssl.map(|c| c.certificate_name.as_str()),
            ),
            protocol: listener_protocol.clone(),
            port: port.port,
            default_backend_set_name: name.clone(),
            ssl_certificate_name: ssl.map(|c| c.certificate_name.clone()),
            idle_timeout_secs,
        };
        listeners.insert(listener.name.clone(), listener);

        ports.insert(
            name,
            PortSpec {
                listener_port: port.port,
                backend_port: port.node_port,
                health_check_port,
            },
        );
    }

    Ok(LbSpec {
        name: load_balancer_name(&config.load_balancer.name_prefix, svc),
        shape,
        internal,
        subnets,
        backend_sets,
        listeners,
        ssl_config,
        source_cidrs: source_cidrs(svc)?,
        ports,
        security_list_mode,
    })
}
