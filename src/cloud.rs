//! Typed operations against the OCI load balancer and networking APIs.
//!
//! Every mutating load balancer call returns the id of a work request which
//! the caller polls through [`CloudClient::get_work_request`].

mod fake;
mod retry;

pub use fake::*;
pub use retry::*;

use async_trait::async_trait;

use crate::{
    error::Result,
    model::{
        BackendSetDesc, CertBundle, CreateLoadBalancerDetails, EgressRule, IngressRule,
        ListenerDesc, LoadBalancer, SecurityList, Subnet, WorkRequest,
    },
};

pub type WorkRequestId = String;

#[async_trait]
pub trait CloudClient: Send + Sync {
    /// Fails with `NotFound` when no load balancer carries the display name.
    async fn get_load_balancer_by_name(&self, name: &str) -> Result<LoadBalancer>;

    async fn get_load_balancer(&self, id: &str) -> Result<LoadBalancer>;

    async fn create_load_balancer(
        &self,
        details: &CreateLoadBalancerDetails,
    ) -> Result<WorkRequestId>;

    async fn delete_load_balancer(&self, id: &str) -> Result<WorkRequestId>;

    async fn create_backend_set(&self, lb_id: &str, desc: &BackendSetDesc)
        -> Result<WorkRequestId>;

    async fn update_backend_set(&self, lb_id: &str, desc: &BackendSetDesc)
        -> Result<WorkRequestId>;

    async fn delete_backend_set(&self, lb_id: &str, name: &str) -> Result<WorkRequestId>;

    async fn create_listener(&self, lb_id: &str, desc: &ListenerDesc) -> Result<WorkRequestId>;

    async fn update_listener(&self, lb_id: &str, desc: &ListenerDesc) -> Result<WorkRequestId>;

    async fn delete_listener(&self, lb_id: &str, name: &str) -> Result<WorkRequestId>;

    /// Idempotent on the certificate name.
    async fn create_certificate(&self, lb_id: &str, bundle: &CertBundle)
        -> Result<WorkRequestId>;

    async fn get_work_request(&self, id: &str) -> Result<WorkRequest>;

    async fn get_subnet(&self, id: &str) -> Result<Subnet>;

    /// De-duplicated subnets containing the given node internal IPs.
    async fn get_subnets_for_internal_ips(&self, ips: &[String]) -> Result<Vec<Subnet>>;

    async fn get_security_list(&self, id: &str) -> Result<SecurityList>;

    /// Replaces the rules of a security list. `etag` is sent as `If-Match`.
    async fn update_security_list(
        &self,
        id: &str,
        etag: Option<&str>,
        ingress: &[IngressRule],
        egress: &[EgressRule],
    ) -> Result<SecurityList>;
}

#[async_trait]
impl<C> CloudClient for std::sync::Arc<C>
where
    C: CloudClient + ?Sized,
{
    async fn get_load_balancer_by_name(&self, name: &str) -> Result<LoadBalancer> {
        (**self).get_load_balancer_by_name(name).await
    }

    async fn get_load_balancer(&self, id: &str) -> Result<LoadBalancer> {
        (**self).get_load_balancer(id).await
    }

    async fn create_load_balancer(
        &self,
        details: &CreateLoadBalancerDetails,
    ) -> Result<WorkRequestId> {
        (**self).create_load_balancer(details).await
    }

    async fn delete_load_balancer(&self, id: &str) -> Result<WorkRequestId> {
        (**self).delete_load_balancer(id).await
    }

    async fn create_backend_set(
        &self,
        lb_id: &str,
        desc: &BackendSetDesc,
    ) -> Result<WorkRequestId> {
        (**self).create_backend_set(lb_id, desc).await
    }

    async fn update_backend_set(
        &self,
        lb_id: &str,
        desc: &BackendSetDesc,
    ) -> Result<WorkRequestId> {
        (**self).update_backend_set(lb_id, desc).await
    }

    async fn delete_backend_set(&self, lb_id: &str, name: &str) -> Result<WorkRequestId> {
        (**self).delete_backend_set(lb_id, name).await
    }

    async fn create_listener(&self, lb_id: &str, desc: &ListenerDesc) -> Result<WorkRequestId> {
        (**self).create_listener(lb_id, desc).await
    }

    async fn update_listener(&self, lb_id: &str, desc: &ListenerDesc) -> Result<WorkRequestId> {
        (**self).update_listener(lb_id, desc).await
    }

    async fn delete_listener(&self, lb_id: &str, name: &str) -> Result<WorkRequestId> {
        (**self).delete_listener(lb_id, name).await
    }

    async fn create_certificate(
        &self,
        lb_id: &str,
        bundle: &CertBundle,
    ) -> Result<WorkRequestId> {
        (**self).create_certificate(lb_id, bundle).await
    }

    async fn get_work_request(&self, id: &str) -> Result<WorkRequest> {
        (**self).get_work_request(id).await
    }

    async fn get_subnet(&self, id: &str) -> Result<Subnet> {
        (**self).get_subnet(id).await
    }

    async fn get_subnets_for_internal_ips(&self, ips: &[String]) -> Result<Vec<Subnet>> {
        (**self).get_subnets_for_internal_ips(ips).await
    }

    async fn get_security_list(&self, id: &str) -> Result<SecurityList> {
        (**self).get_security_list(id).await
    }

    async fn update_security_list(
        &self,
        id: &str,
        etag: Option<&str>,
        ingress: &[IngressRule],
        egress: &[EgressRule],
    ) -> Result<SecurityList> {
        (**self)
            .update_security_list(id, etag, ingress, egress)
            .await
    }
}
