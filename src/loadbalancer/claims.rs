//! Security-rule ports other load balancer services still rely on.
//!
//! Rules on a listener port may be shared by every service exposing that
//! port, and the node health proxy port is shared by every service without a
//! `healthCheckNodePort`. Node ports are unique per service and never shared.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use crate::{error::Result, model::ServiceRequest};

use super::spec::{source_cidrs, DEFAULT_HEALTH_CHECK_PORT};

/// Lists the `type: LoadBalancer` services of the cluster.
#[async_trait]
pub trait ServiceLister: Send + Sync {
    async fn load_balancer_services(&self) -> Result<Vec<ServiceRequest>>;
}

#[async_trait]
impl<L> ServiceLister for std::sync::Arc<L>
where
    L: ServiceLister + ?Sized,
{
    async fn load_balancer_services(&self) -> Result<Vec<ServiceRequest>> {
        (**self).load_balancer_services().await
    }
}

/// A fixed set of services.
#[derive(Debug, Clone, Default)]
pub struct StaticServices(pub Vec<ServiceRequest>);

#[async_trait]
impl ServiceLister for StaticServices {
    async fn load_balancer_services(&self) -> Result<Vec<ServiceRequest>> {
        Ok(self.0.clone())
    }
}

/// Rules held by services other than the one being reconciled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortClaims {
    /// Listener port to the source CIDRs allowed on it; `None` holds every
    /// source.
    listeners: BTreeMap<u16, Option<BTreeSet<String>>>,
    health_check_ports: BTreeSet<u16>,
    everything: bool,
}

impl PortClaims {
    /// Claims of every service in `services` except the one keyed `own`
    /// (`namespace/name`).
    pub fn from_services(own: &str, services: &[ServiceRequest]) -> Self {
        let mut claims = Self::default();

        for svc in services.iter().filter(|svc| svc.key() != own) {
            // unparsable ranges hold every source on the port
            let sources = source_cidrs(svc)
                .ok()
                .map(|cidrs| cidrs.into_iter().collect::<BTreeSet<_>>());

            for port in &svc.ports {
                claims.claim_listener(port.port, sources.clone());
            }

            claims.claim_health_check_port(
                svc.health_check_node_port
                    .unwrap_or(DEFAULT_HEALTH_CHECK_PORT),
            );
        }

        claims
    }

    /// Holds every rule. Used when the other services are unknown.
    pub fn everything() -> Self {
        Self {
            everything: true,
            ..Default::default()
        }
    }

    fn claim_listener(&mut self, port: u16, sources: Option<BTreeSet<String>>) {
        let merged = match (self.listeners.remove(&port), sources) {
            (None, sources) => sources,
            (Some(Some(mut held)), Some(sources)) => {
                held.extend(sources);
                Some(held)
            }
            _ => None,
        };

        self.listeners.insert(port, merged);
    }

    pub fn claim_health_check_port(&mut self, port: u16) {
        self.health_check_ports.insert(port);
    }

    pub fn holds_listener_rule(&self, port: u16, source: &str) -> bool {
        self.everything
            || match self.listeners.get(&port) {
                Some(Some(sources)) => sources.contains(source),
                Some(None) => true,
                None => false,
            }
    }

    pub fn holds_health_check_port(&self, port: u16) -> bool {
        self.everything || self.health_check_ports.contains(&port)
    }
}
