//! Security-list rules that let traffic reach a load balancer and flow from
//! it to the nodes.
//!
//! For a listener port `L`, backend (node) port `B` and health-check port `H`:
//!
//! * node subnet lists get ingress from every LB subnet CIDR on `B` and `H`
//! * LB subnet lists get egress to every node subnet CIDR on `B` and `H`
//! * LB subnet lists get ingress from every source CIDR on `L`
//!
//! Opening only appends missing rules. Converging also drops rules on those
//! ports whose peer is no longer wanted, and closing drops every rule on them.
//! Neither drops a rule that [`PortClaims`] holds for another service.

use std::{collections::BTreeMap, net::IpAddr, time::Duration};

use futures::future::try_join_all;
use ipnet::IpNet;

use crate::{
    cloud::CloudClient,
    error::Result,
    logger,
    model::{EgressRule, IngressRule, PortSpec, SecurityList, SecurityListMode, Subnet},
};

use super::{
    cache::{TtlCache, DEFAULT_CACHE_TTL},
    claims::PortClaims,
    ReconcileContext,
};

/// Arguments of the [`SecurityListPolicy`] operations.
#[derive(Debug, Clone, Copy)]
pub struct RuleRequest<'a> {
    pub lb_subnets: &'a [String],
    pub source_cidrs: &'a [String],
    pub ports: PortSpec,
    /// Internal IPs of the backends.
    pub backends: &'a [String],
    /// Ports of the backend set before this pass.
    pub previous_ports: Option<PortSpec>,
    /// Backend IPs before this pass.
    pub previous_backends: &'a [String],
    pub claims: &'a PortClaims,
}

/// Subnet and security-list caches plus the subnet to list mapping.
///
/// One manager serves every service; the mode is chosen per call through
/// [`SecurityListManager::policy`].
#[derive(Debug)]
pub struct SecurityListManager {
    subnets: TtlCache<Subnet>,
    security_lists: TtlCache<SecurityList>,
    list_overrides: BTreeMap<String, String>,
}

impl Default for SecurityListManager {
    fn default() -> Self {
        Self::new(BTreeMap::new(), DEFAULT_CACHE_TTL)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Open,
    Converge,
    Close,
}

/// Who else may rely on rules of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sharing {
    /// Node ports belong to one service.
    Unshared,
    Listener,
    HealthCheck,
}

impl Sharing {
    fn held(self, claims: &PortClaims, port: u16, peer: &str) -> bool {
        match self {
            Self::Unshared => false,
            Self::Listener => claims.holds_listener_rule(port, peer),
            Self::HealthCheck => claims.holds_health_check_port(port),
        }
    }
}

/// Wanted peers of the rules on one port. Port 0 is skipped.
#[derive(Debug, Clone, Copy)]
struct PortRules<'a> {
    port: u16,
    peers: &'a [String],
    sharing: Sharing,
}

/// Rules towards the nodes, on the backend and health-check ports. Ports of
/// `stale` other than 0 are cleared.
fn node_port_rules<'a>(ports: &PortSpec, stale: &PortSpec, peers: &'a [String]) -> [PortRules<'a>; 4] {
    [
        PortRules {
            port: ports.backend_port,
            peers,
            sharing: Sharing::Unshared,
        },
        PortRules {
            port: ports.health_check_port,
            peers,
            sharing: Sharing::HealthCheck,
        },
        PortRules {
            port: stale.backend_port,
            peers: &[],
            sharing: Sharing::Unshared,
        },
        PortRules {
            port: stale.health_check_port,
            peers: &[],
            sharing: Sharing::HealthCheck,
        },
    ]
}

fn listener_rules<'a>(ports: &PortSpec, stale: &PortSpec, peers: &'a [String]) -> [PortRules<'a>; 2] {
    [
        PortRules {
            port: ports.listener_port,
            peers,
            sharing: Sharing::Listener,
        },
        PortRules {
            port: stale.listener_port,
            peers: &[],
            sharing: Sharing::Listener,
        },
    ]
}

/// One rule shape the manager writes.
trait Rule: Clone + PartialEq {
    fn peer(&self) -> &str;
    fn targets(&self, port: u16) -> bool;
    fn tcp(peer: &str, port: u16) -> Self;
}

impl Rule for IngressRule {
    fn peer(&self) -> &str {
        &self.source
    }

    fn targets(&self, port: u16) -> bool {
        IngressRule::targets(self, port)
    }

    fn tcp(peer: &str, port: u16) -> Self {
        IngressRule::tcp(peer, port)
    }
}

impl Rule for EgressRule {
    fn peer(&self) -> &str {
        &self.destination
    }

    fn targets(&self, port: u16) -> bool {
        EgressRule::targets(self, port)
    }

    fn tcp(peer: &str, port: u16) -> Self {
        EgressRule::tcp(peer, port)
    }
}

/// Returns the edited rules, or `None` when nothing changes.
///
/// Rules for other ports or of another shape are kept untouched.
fn edit_rules<R: Rule>(
    rules: &[R],
    wanted: &[PortRules<'_>],
    claims: &PortClaims,
    prune: bool,
) -> Option<Vec<R>> {
    let mut edited = rules.to_vec();

    for want in wanted.iter().filter(|want| want.port != 0) {
        if prune {
            edited.retain(|rule| {
                !rule.targets(want.port)
                    || want.peers.iter().any(|peer| peer == rule.peer())
                    || want.sharing.held(claims, want.port, rule.peer())
            });
        }

        for peer in want.peers {
            if !edited
                .iter()
                .any(|rule| rule.targets(want.port) && rule.peer() == peer)
            {
                edited.push(R::tcp(peer, want.port));
            }
        }
    }

    (edited.as_slice() != rules).then_some(edited)
}

/// What one security-list update should do.
struct Edit<'a> {
    ingress: &'a [PortRules<'a>],
    egress: &'a [PortRules<'a>],
    claims: &'a PortClaims,
    prune: bool,
}

fn contains_ip(subnet: &Subnet, ip: IpAddr) -> bool {
    subnet
        .cidr_block
        .parse::<IpNet>()
        .is_ok_and(|net| net.contains(&ip))
}

fn dedup_by_id(subnets: Vec<Subnet>) -> Vec<Subnet> {
    let mut unique: Vec<Subnet> = Vec::with_capacity(subnets.len());
    for subnet in subnets {
        if !unique.iter().any(|s| s.id == subnet.id) {
            unique.push(subnet);
        }
    }
    unique.sort_by(|a, b| a.id.cmp(&b.id));
    unique
}

/// Ports of `previous` that differ from `current`; the rest are 0.
fn stale_ports(current: &PortSpec, previous: Option<PortSpec>) -> PortSpec {
    let previous = previous.unwrap_or_default();
    let stale = |old: u16, new: u16| if old == new { 0 } else { old };

    PortSpec {
        listener_port: stale(previous.listener_port, current.listener_port),
        backend_port: stale(previous.backend_port, current.backend_port),
        health_check_port: stale(previous.health_check_port, current.health_check_port),
    }
}

impl SecurityListManager {
    pub fn new(list_overrides: BTreeMap<String, String>, ttl: Duration) -> Self {
        Self {
            subnets: TtlCache::new(ttl),
            security_lists: TtlCache::new(ttl),
            list_overrides,
        }
    }

    pub fn policy(&self, mode: SecurityListMode) -> SecurityListPolicy<'_> {
        match mode {
            SecurityListMode::Managed => SecurityListPolicy::Managed(self),
            SecurityListMode::Frontend => SecurityListPolicy::Frontend(self),
            SecurityListMode::None => SecurityListPolicy::None,
        }
    }

    async fn subnet<C>(&self, client: &C, ctx: &ReconcileContext, id: &str) -> Result<Subnet>
    where
        C: CloudClient + ?Sized,
    {
        if let Some(subnet) = self.subnets.get(id).await {
            return Ok(subnet);
        }

        let subnet = ctx.run("GetSubnet", client.get_subnet(id)).await?;
        self.subnets.insert(id, subnet.clone()).await;

        Ok(subnet)
    }

    async fn lb_subnets<C>(
        &self,
        client: &C,
        ctx: &ReconcileContext,
        ids: &[String],
    ) -> Result<Vec<Subnet>>
    where
        C: CloudClient + ?Sized,
    {
        try_join_all(ids.iter().map(|id| self.subnet(client, ctx, id))).await
    }

    /// Subnets of the backend IPs: cached subnets by CIDR containment first,
    /// then one lookup for the rest.
    async fn node_subnets<C>(
        &self,
        client: &C,
        ctx: &ReconcileContext,
        ips: &[String],
    ) -> Result<Vec<Subnet>>
    where
        C: CloudClient + ?Sized,
    {
        if ips.is_empty() {
            return Ok(Vec::new());
        }

        let cached = self.subnets.values().await;

        let mut found: Vec<Subnet> = Vec::new();
        let mut unresolved: Vec<String> = Vec::new();

        for ip in ips {
            let hit = ip
                .parse::<IpAddr>()
                .ok()
                .and_then(|addr| cached.iter().find(|s| contains_ip(s, addr)));

            match hit {
                Some(subnet) => found.push(subnet.clone()),
                None => unresolved.push(ip.clone()),
            }
        }

        if !unresolved.is_empty() {
            let fetched = ctx
                .run(
                    "GetSubnetsForInternalIPs",
                    client.get_subnets_for_internal_ips(&unresolved),
                )
                .await?;

            for subnet in fetched {
                self.subnets.insert(subnet.id.clone(), subnet.clone()).await;
                found.push(subnet);
            }
        }

        Ok(dedup_by_id(found))
    }

    /// The configured list of the subnet when it is attached to it, else the
    /// subnet's first list.
    fn security_list_id<'a>(&'a self, subnet: &'a Subnet) -> Option<&'a str> {
        if let Some(id) = self.list_overrides.get(&subnet.id) {
            if subnet.security_list_ids.contains(id) {
                return Some(id.as_str());
            }

            logger!(
                warn,
                "security list {id} configured for subnet {} is not attached to it, using the subnet's first list",
                subnet.id
            );
        }

        subnet.security_list_ids.first().map(String::as_str)
    }

    async fn security_list<C>(
        &self,
        client: &C,
        ctx: &ReconcileContext,
        id: &str,
    ) -> Result<SecurityList>
    where
        C: CloudClient + ?Sized,
    {
        if let Some(list) = self.security_lists.get(id).await {
            return Ok(list);
        }

        let list = ctx
            .run("GetSecurityList", client.get_security_list(id))
            .await?;
        self.security_lists.insert(id, list.clone()).await;

        Ok(list)
    }

    /// Edits the list of `subnet`. No call is made when the rules are already
    /// in the wanted state.
    async fn update<C>(
        &self,
        client: &C,
        ctx: &ReconcileContext,
        subnet: &Subnet,
        edit: &Edit<'_>,
    ) -> Result<()>
    where
        C: CloudClient + ?Sized,
    {
        let Some(list_id) = self.security_list_id(subnet) else {
            logger!(warn, "subnet {} has no security list, skipping rules", subnet.id);
            return Ok(());
        };

        let list = self.security_list(client, ctx, list_id).await?;

        let new_ingress = edit_rules(&list.ingress_security_rules, edit.ingress, edit.claims, edit.prune);
        let new_egress = edit_rules(&list.egress_security_rules, edit.egress, edit.claims, edit.prune);

        if new_ingress.is_none() && new_egress.is_none() {
            return Ok(());
        }

        let ingress = new_ingress.unwrap_or_else(|| list.ingress_security_rules.clone());
        let egress = new_egress.unwrap_or_else(|| list.egress_security_rules.clone());

        logger!(
            debug,
            "updating security list {list_id} of subnet {}: {} ingress, {} egress rules",
            subnet.id,
            ingress.len(),
            egress.len()
        );

        let result = ctx
            .run(
                "UpdateSecurityList",
                client.update_security_list(list_id, list.etag.as_deref(), &ingress, &egress),
            )
            .await;

        match result {
            Ok(updated) => {
                self.security_lists.insert(list_id, updated).await;
                Ok(())
            }
            Err(err) => {
                logger!(error, "updating security list {list_id} failed: {err}");
                self.security_lists.invalidate(list_id).await;
                Err(err)
            }
        }
    }

    /// Node subnets that held backends before this pass but hold none now,
    /// except those sharing a list with a current node subnet.
    async fn abandoned_subnets<C>(
        &self,
        client: &C,
        ctx: &ReconcileContext,
        current: &[Subnet],
        previous_backends: &[String],
    ) -> Result<Vec<Subnet>>
    where
        C: CloudClient + ?Sized,
    {
        let previous = self.node_subnets(client, ctx, previous_backends).await?;

        Ok(previous
            .into_iter()
            .filter(|old| {
                !current.iter().any(|subnet| {
                    subnet.id == old.id
                        || self.security_list_id(subnet) == self.security_list_id(old)
                })
            })
            .collect())
    }

    async fn reconcile<C>(
        &self,
        client: &C,
        ctx: &ReconcileContext,
        request: &RuleRequest<'_>,
        change: Change,
        manage_nodes: bool,
    ) -> Result<()>
    where
        C: CloudClient + ?Sized,
    {
        let lb_subnets = self.lb_subnets(client, ctx, request.lb_subnets).await?;

        let (node_subnets, abandoned) = if manage_nodes {
            let current = self.node_subnets(client, ctx, request.backends).await?;
            let abandoned = if change == Change::Converge {
                self.abandoned_subnets(client, ctx, &current, request.previous_backends)
                    .await?
            } else {
                Vec::new()
            };
            (current, abandoned)
        } else {
            (Vec::new(), Vec::new())
        };

        let lb_cidrs: Vec<String> = lb_subnets.iter().map(|s| s.cidr_block.clone()).collect();
        let node_cidrs: Vec<String> = node_subnets.iter().map(|s| s.cidr_block.clone()).collect();

        let (sources, lb_peers, node_peers): (&[String], &[String], &[String]) = match change {
            Change::Close => (&[], &[], &[]),
            Change::Open | Change::Converge => {
                (request.source_cidrs, lb_cidrs.as_slice(), node_cidrs.as_slice())
            }
        };

        let ports = request.ports;
        let stale = match change {
            Change::Converge => stale_ports(&ports, request.previous_ports),
            Change::Open | Change::Close => PortSpec::default(),
        };

        let node_ingress = node_port_rules(&ports, &stale, lb_peers);
        let abandoned_ingress = node_port_rules(&ports, &stale, &[]);
        let lb_ingress = listener_rules(&ports, &stale, sources);
        let lb_egress = node_port_rules(&ports, &stale, node_peers);

        let prune = change != Change::Open;
        let node_edit = Edit {
            ingress: &node_ingress,
            egress: &[],
            claims: request.claims,
            prune,
        };
        let lb_edit = Edit {
            ingress: &lb_ingress,
            egress: if manage_nodes { &lb_egress } else { &[] },
            claims: request.claims,
            prune,
        };
        let abandoned_edit = Edit {
            ingress: &abandoned_ingress,
            egress: &[],
            claims: request.claims,
            prune: true,
        };

        // Nodes accept traffic before the front end opens; the reverse on close.
        match change {
            Change::Open | Change::Converge => {
                for subnet in &node_subnets {
                    self.update(client, ctx, subnet, &node_edit).await?;
                }
                for subnet in &lb_subnets {
                    self.update(client, ctx, subnet, &lb_edit).await?;
                }
                for subnet in &abandoned {
                    self.update(client, ctx, subnet, &abandoned_edit).await?;
                }
            }
            Change::Close => {
                for subnet in lb_subnets.iter().rev() {
                    self.update(client, ctx, subnet, &lb_edit).await?;
                }
                for subnet in node_subnets.iter().rev() {
                    self.update(client, ctx, subnet, &node_edit).await?;
                }
            }
        }

        Ok(())
    }
}

/// Security-list behavior selected by the management mode.
#[derive(Debug, Clone, Copy)]
pub enum SecurityListPolicy<'a> {
    /// Touches nothing.
    None,
    /// Load balancer ingress only.
    Frontend(&'a SecurityListManager),
    /// Load balancer ingress and egress, node ingress.
    Managed(&'a SecurityListManager),
}

impl SecurityListPolicy<'_> {
    async fn apply<C>(
        &self,
        client: &C,
        ctx: &ReconcileContext,
        request: &RuleRequest<'_>,
        change: Change,
    ) -> Result<()>
    where
        C: CloudClient + ?Sized,
    {
        match self {
            Self::None => Ok(()),
            Self::Frontend(manager) => manager.reconcile(client, ctx, request, change, false).await,
            Self::Managed(manager) => manager.reconcile(client, ctx, request, change, true).await,
        }
    }

    /// Opens the rules of the request without dropping any.
    pub async fn reconcile_for_add<C>(
        &self,
        client: &C,
        ctx: &ReconcileContext,
        request: &RuleRequest<'_>,
    ) -> Result<()>
    where
        C: CloudClient + ?Sized,
    {
        self.apply(client, ctx, request, Change::Open).await
    }

    /// Makes the rules on the request's ports exactly the wanted ones, and
    /// clears ports and node subnets the backend set no longer uses.
    pub async fn reconcile_for_update<C>(
        &self,
        client: &C,
        ctx: &ReconcileContext,
        request: &RuleRequest<'_>,
    ) -> Result<()>
    where
        C: CloudClient + ?Sized,
    {
        self.apply(client, ctx, request, Change::Converge).await
    }

    /// Clears the rules on the request's ports.
    pub async fn reconcile_for_remove<C>(
        &self,
        client: &C,
        ctx: &ReconcileContext,
        request: &RuleRequest<'_>,
    ) -> Result<()>
    where
        C: CloudClient + ?Sized,
    {
        self.apply(client, ctx, request, Change::Close).await
    }
}
