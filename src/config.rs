use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::{error::Error, loadbalancer::PollConfig, model::SecurityListMode};

pub const DEFAULT_SHAPE: &str = "100Mbps";

const ENV_PREFIX: &str = "OCI_LB_";

/// Environment keys arrive upper-cased; these are the spellings the
/// configuration structs expect for multi-word names.
const CANONICAL_KEYS: &[&str] = &[
    "Global",
    "LoadBalancer",
    "WorkRequest",
    "disableSecurityListManagement",
    "securityListManagementMode",
    "securityLists",
    "namePrefix",
    "initialSecs",
    "capSecs",
    "budgetSecs",
];

#[derive(Debug, Default)]
pub enum ConfigLoadOption {
    #[default]
    Default,

    Path(PathBuf),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalConfig {
    pub tenancy: String,
    pub compartment: String,
    pub region: String,
    /// Path to the API signing key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<PathBuf>,
    /// Deprecated; superseded by `securityListManagementMode`.
    pub disable_security_list_management: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoadBalancerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnet1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnet2: Option<String>,
    pub shape: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_list_management_mode: Option<SecurityListMode>,
    /// Subnet id to the security list that should be managed for it.
    pub security_lists: BTreeMap<String, String>,
    pub name_prefix: String,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            subnet1: None,
            subnet2: None,
            shape: DEFAULT_SHAPE.to_string(),
            security_list_management_mode: None,
            security_lists: BTreeMap::new(),
            name_prefix: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkRequestConfig {
    pub initial_secs: u64,
    pub cap_secs: u64,
    pub budget_secs: u64,
}

impl Default for WorkRequestConfig {
    fn default() -> Self {
        Self {
            initial_secs: 1,
            cap_secs: 30,
            budget_secs: 20 * 60,
        }
    }
}

impl WorkRequestConfig {
    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            initial: Duration::from_secs(self.initial_secs),
            cap: Duration::from_secs(self.cap_secs),
            budget: Duration::from_secs(self.budget_secs),
        }
    }
}

/// Cloud provider configuration, read from a TOML file with `[Global]`,
/// `[LoadBalancer]` and `[WorkRequest]` sections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    #[serde(rename = "Global")]
    pub global: GlobalConfig,
    #[serde(rename = "LoadBalancer")]
    pub load_balancer: LoadBalancerConfig,
    #[serde(rename = "WorkRequest")]
    pub work_request: WorkRequestConfig,
}

fn canonical_env_key(key: &str) -> String {
    key.split('.')
        .map(|part| {
            CANONICAL_KEYS
                .iter()
                .find(|canonical| canonical.eq_ignore_ascii_case(part))
                .map(|canonical| canonical.to_string())
                .unwrap_or_else(|| part.to_ascii_lowercase())
        })
        .collect::<Vec<_>>()
        .join(".")
}

impl ProviderConfig {
    pub fn load(option: ConfigLoadOption) -> Result<Self> {
        let figment = Figment::new();

        let mut config: Self = match option {
            ConfigLoadOption::Default => figment.merge(Serialized::defaults(Self::default())),
            ConfigLoadOption::Path(path) => figment
                .merge(Serialized::defaults(Self::default()))
                .merge(Toml::file(path)),
        }
        .merge(
            Env::prefixed(ENV_PREFIX)
                .split("__")
                .lowercase(false)
                .map(|key| canonical_env_key(key.as_str()).into()),
        )
        .extract_lossy()?;

        config.complete();
        config.validate()?;

        Ok(config)
    }

    /// Fills derived settings: the deprecated `disableSecurityListManagement`
    /// flag selects mode `none` when no mode is configured.
    pub fn complete(&mut self) {
        let lb = &mut self.load_balancer;

        if lb.security_list_management_mode.is_none() {
            lb.security_list_management_mode = Some(if self.global.disable_security_list_management {
                SecurityListMode::None
            } else {
                SecurityListMode::Managed
            });
        }

        if !lb.name_prefix.is_empty() && !lb.name_prefix.ends_with('-') {
            lb.name_prefix.push('-');
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.global.compartment.is_empty() {
            return Err(Error::InvalidConfig(
                "Global.compartment must be set".into(),
            ));
        }

        if self.global.region.is_empty() {
            return Err(Error::InvalidConfig("Global.region must be set".into()));
        }

        if let (Some(subnet1), Some(subnet2)) =
            (&self.load_balancer.subnet1, &self.load_balancer.subnet2)
        {
            if subnet1 == subnet2 {
                return Err(Error::InvalidConfig(format!(
                    "LoadBalancer.subnet1 and LoadBalancer.subnet2 are both {subnet1}"
                )));
            }
        }

        let work_request = &self.work_request;
        if work_request.initial_secs == 0 || work_request.cap_secs < work_request.initial_secs {
            return Err(Error::InvalidConfig(
                "WorkRequest.capSecs must be at least WorkRequest.initialSecs, which must be positive"
                    .into(),
            ));
        }

        Ok(())
    }

    pub fn security_list_mode(&self) -> SecurityListMode {
        match self.load_balancer.security_list_management_mode {
            Some(mode) => mode,
            None if self.global.disable_security_list_management => SecurityListMode::None,
            None => SecurityListMode::Managed,
        }
    }
}
