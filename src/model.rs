mod loadbalancer;
mod network;
mod service;

pub use loadbalancer::*;
pub use network::*;
pub use service::*;
