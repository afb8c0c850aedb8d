use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::{api::ListParams, Api, Client, ResourceExt as _};

use crate::{error::Result, loadbalancer::ServiceLister, logger, model::ServiceRequest};

const SERVICE_TYPE_LOAD_BALANCER: &str = "LoadBalancer";

/// The `type: LoadBalancer` services among `services`. Services that cannot
/// be read are skipped.
pub fn load_balancer_services<'a>(
    services: impl IntoIterator<Item = &'a Service>,
) -> Vec<ServiceRequest> {
    services
        .into_iter()
        .filter(|svc| {
            svc.spec.as_ref().and_then(|spec| spec.type_.as_deref())
                == Some(SERVICE_TYPE_LOAD_BALANCER)
        })
        .filter_map(|svc| match ServiceRequest::try_from(svc) {
            Ok(service) => Some(service),
            Err(err) => {
                logger!(debug, "skipping service {}: {err}", svc.name_any());
                None
            }
        })
        .collect()
}

/// Lists services cluster-wide through the API server.
#[derive(Clone)]
pub struct KubeServiceLister {
    client: Client,
}

impl KubeServiceLister {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(Client::try_default().await?))
    }
}

#[async_trait]
impl ServiceLister for KubeServiceLister {
    async fn load_balancer_services(&self) -> Result<Vec<ServiceRequest>> {
        let api: Api<Service> = Api::all(self.client.clone());

        let list = api.list(&ListParams::default()).await?;

        logger!(debug, "listed {} services", list.items.len());

        Ok(load_balancer_services(&list.items))
    }
}
