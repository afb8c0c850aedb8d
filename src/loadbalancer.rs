//! Reconciliation of one Kubernetes service against its cloud load balancer.

mod cache;
mod certificate;
mod claims;
mod context;
mod diff;
mod reconciler;
mod security_list;
mod spec;
mod work_request;

pub use cache::{TtlCache, DEFAULT_CACHE_TTL};
pub use certificate::{
    certificate_name, parse_secret_ref, CertificateStore, SecretReader, StaticSecrets,
    CA_CERT_KEY, TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY,
};
pub use claims::{PortClaims, ServiceLister, StaticServices};
pub use context::ReconcileContext;
pub use diff::{Action, Plan, Step};
pub use reconciler::{EnsureOutcome, Reconciler};
pub use security_list::{RuleRequest, SecurityListManager, SecurityListPolicy};
pub use spec::*;
pub use work_request::{await_work_request, PollConfig};
