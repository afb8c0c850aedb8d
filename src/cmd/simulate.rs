use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use k8s_openapi::api::core::v1::{LoadBalancerStatus, Node, Service};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    cloud::{FakeCloud, FakeCloudState, RetryConfig, RetryingClient},
    config::ProviderConfig,
    kube::{load_balancer_services, KubeSecretReader, KubeServiceLister},
    loadbalancer::{
        ReconcileContext, Reconciler, SecretReader, ServiceLister, StaticSecrets, StaticServices,
    },
    logger,
    model::{NodeInfo, ServiceRequest},
};

#[derive(Subcommand, Debug, Clone)]
pub enum SimulateCommand {
    /// Create or converge the service's load balancer
    Ensure(SimulateArgs),
    /// Remove the service's load balancer and its security rules
    Delete(SimulateArgs),
    /// Show the service's load balancer status
    Status(SimulateArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulateAction {
    Ensure,
    Delete,
    Status,
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Service manifest (YAML)
    #[arg(long)]
    pub service: PathBuf,

    /// Node manifests as a YAML list
    #[arg(long)]
    pub nodes: Option<PathBuf>,

    /// Cloud state and secrets (YAML)
    #[arg(long)]
    pub state: PathBuf,

    /// Write the cloud state after the run to this file
    #[arg(long)]
    pub save_state: Option<PathBuf>,

    /// Read TLS secrets from the cluster instead of the state file
    #[arg(long)]
    pub cluster_secrets: bool,

    /// List the cluster's services instead of the state file's when deciding
    /// which shared security rules to keep
    #[arg(long)]
    pub cluster_services: bool,
}

/// State file of the simulator: [`FakeCloudState`], TLS secrets keyed by
/// `namespace/name` and the other services of the cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationState {
    #[serde(flatten)]
    pub cloud: FakeCloudState,
    #[serde(default)]
    pub secrets: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<Service>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    pub load_balancer: String,
    pub calls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<LoadBalancerStatus>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;

    serde_yaml::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

impl SimulateCommand {
    pub fn action(&self) -> SimulateAction {
        match self {
            Self::Ensure(_) => SimulateAction::Ensure,
            Self::Delete(_) => SimulateAction::Delete,
            Self::Status(_) => SimulateAction::Status,
        }
    }

    pub fn args(&self) -> &SimulateArgs {
        match self {
            Self::Ensure(args) | Self::Delete(args) | Self::Status(args) => args,
        }
    }

    pub async fn run(self, config: ProviderConfig, ctx: ReconcileContext) -> Result<SimulationReport> {
        let action = self.action();
        let args = self.args();

        let service: Service = read_yaml(&args.service)?;
        let service = ServiceRequest::try_from(&service)?;

        let nodes: Vec<NodeInfo> = match &args.nodes {
            Some(path) => read_yaml::<Vec<Node>>(path)?
                .iter()
                .map(NodeInfo::from)
                .collect(),
            None => Vec::new(),
        };

        let state: SimulationState = read_yaml(&args.state)?;

        let secrets: Arc<dyn SecretReader> = if args.cluster_secrets {
            Arc::new(KubeSecretReader::try_default().await?)
        } else {
            Arc::new(StaticSecrets(state.secrets.clone()))
        };

        let services: Arc<dyn ServiceLister> = if args.cluster_services {
            Arc::new(KubeServiceLister::try_default().await?)
        } else {
            Arc::new(StaticServices(load_balancer_services(&state.services)))
        };

        let cloud = RetryingClient::new(FakeCloud::new(state.cloud), RetryConfig::default());
        let reconciler = Reconciler::new(cloud, secrets, services, config);

        logger!(info, "simulating {:?} for service {}", action, service.key());

        let mut report = SimulationReport {
            load_balancer: crate::loadbalancer::load_balancer_name(
                &reconciler.config().load_balancer.name_prefix,
                &service,
            ),
            ..Default::default()
        };

        let result = match action {
            SimulateAction::Ensure => reconciler
                .ensure(&ctx, &service, &nodes)
                .await
                .map(|outcome| {
                    report.status = Some(outcome.status);
                    report.warnings = outcome.warnings;
                }),
            SimulateAction::Delete => reconciler.ensure_deleted(&ctx, &service).await,
            SimulateAction::Status => reconciler
                .status(&ctx, &service)
                .await
                .map(|status| report.status = status),
        };

        let fake = reconciler.client().inner();
        report.calls = fake.calls().iter().map(ToString::to_string).collect();

        if let Some(path) = &args.save_state {
            let saved = SimulationState {
                cloud: fake.state(),
                secrets: state.secrets,
                services: state.services,
            };

            fs::write(path, serde_yaml::to_string(&saved)?)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }

        match result {
            Ok(()) => Ok(report),
            Err(err) => {
                for call in &report.calls {
                    eprintln!("{call}");
                }
                Err(err.into())
            }
        }
    }
}
