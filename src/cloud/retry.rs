use std::{future::Future, time::Duration};

use async_trait::async_trait;

use crate::{
    error::Result,
    logger,
    model::{
        BackendSetDesc, CertBundle, CreateLoadBalancerDetails, EgressRule, IngressRule,
        ListenerDesc, LoadBalancer, SecurityList, Subnet, WorkRequest,
    },
};

use super::{CloudClient, WorkRequestId};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

/// Retries calls of the wrapped client that fail with a transient error.
///
/// `update_security_list` is not retried: it is guarded by an ETag, and the
/// security-list manager refetches the list on the next pass instead.
#[derive(Debug, Clone)]
pub struct RetryingClient<C> {
    inner: C,
    config: RetryConfig,
}

impl<C: CloudClient> RetryingClient<C> {
    pub fn new(inner: C, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    async fn retry<F, Fut, T>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        let mut delay = self.config.initial_delay;

        loop {
            attempt += 1;

            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.config.max_attempts => {
                    logger!(
                        warn,
                        "{operation} failed (attempt {attempt}/{}), retrying in {delay:?}: {err}",
                        self.config.max_attempts
                    );

                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.config.max_delay);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl<C: CloudClient> CloudClient for RetryingClient<C> {
    async fn get_load_balancer_by_name(&self, name: &str) -> Result<LoadBalancer> {
        self.retry("GetLoadBalancerByName", || {
            self.inner.get_load_balancer_by_name(name)
        })
        .await
    }

    async fn get_load_balancer(&self, id: &str) -> Result<LoadBalancer> {
        self.retry("GetLoadBalancer", || self.inner.get_load_balancer(id))
            .await
    }

    async fn create_load_balancer(
        &self,
        details: &CreateLoadBalancerDetails,
    ) -> Result<WorkRequestId> {
        self.retry("CreateLoadBalancer", || {
            self.inner.create_load_balancer(details)
        })
        .await
    }

    async fn delete_load_balancer(&self, id: &str) -> Result<WorkRequestId> {
        self.retry("DeleteLoadBalancer", || self.inner.delete_load_balancer(id))
            .await
    }

    async fn create_backend_set(
        &self,
        lb_id: &str,
        desc: &BackendSetDesc,
    ) -> Result<WorkRequestId> {
        self.retry("CreateBackendSet", || {
            self.inner.create_backend_set(lb_id, desc)
        })
        .await
    }

    async fn update_backend_set(
        &self,
        lb_id: &str,
        desc: &BackendSetDesc,
    ) -> Result<WorkRequestId> {
        self.retry("UpdateBackendSet", || {
            self.inner.update_backend_set(lb_id, desc)
        })
        .await
    }

    async fn delete_backend_set(&self, lb_id: &str, name: &str) -> Result<WorkRequestId> {
        self.retry("DeleteBackendSet", || {
            self.inner.delete_backend_set(lb_id, name)
        })
        .await
    }

    async fn create_listener(&self, lb_id: &str, desc: &ListenerDesc) -> Result<WorkRequestId> {
        self.retry("CreateListener", || self.inner.create_listener(lb_id, desc))
            .await
    }

    async fn update_listener(&self, lb_id: &str, desc: &ListenerDesc) -> Result<WorkRequestId> {
        self.retry("UpdateListener", || self.inner.update_listener(lb_id, desc))
            .await
    }

    async fn delete_listener(&self, lb_id: &str, name: &str) -> Result<WorkRequestId> {
        self.retry("DeleteListener", || self.inner.delete_listener(lb_id, name))
            .await
    }

    async fn create_certificate(
        &self,
        lb_id: &str,
        bundle: &CertBundle,
    ) -> Result<WorkRequestId> {
        self.retry("CreateCertificate", || {
            self.inner.create_certificate(lb_id, bundle)
        })
        .await
    }

    async fn get_work_request(&self, id: &str) -> Result<WorkRequest> {
        self.retry("GetWorkRequest", || self.inner.get_work_request(id))
            .await
    }

    async fn get_subnet(&self, id: &str) -> Result<Subnet> {
        self.retry("GetSubnet", || self.inner.get_subnet(id)).await
    }

    async fn get_subnets_for_internal_ips(&self, ips: &[String]) -> Result<Vec<Subnet>> {
        self.retry("GetSubnetsForInternalIPs", || {
            self.inner.get_subnets_for_internal_ips(ips)
        })
        .await
    }

    async fn get_security_list(&self, id: &str) -> Result<SecurityList> {
        self.retry("GetSecurityList", || self.inner.get_security_list(id))
            .await
    }

    async fn update_security_list(
        &self,
        id: &str,
        etag: Option<&str>,
        ingress: &[IngressRule],
        egress: &[EgressRule],
    ) -> Result<SecurityList> {
        self.inner
            .update_security_list(id, etag, ingress, egress)
            .await
    }
}
