mod secret;
mod service;

pub use secret::KubeSecretReader;
pub use service::{load_balancer_services, KubeServiceLister};
