use std::{path::PathBuf, time::Duration};

use clap::{Parser, ValueEnum};

use crate::{config::ConfigLoadOption, logging::LogTarget};

use super::SimulateCommand;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None, disable_help_subcommand = true)]
pub struct Command {
    /// Provider config file (TOML)
    #[arg(short, long, env = "OCI_LB_CONFIG", display_order = 1000)]
    pub config: Option<PathBuf>,

    /// Logging
    #[arg(short = 'l', long, display_order = 1000)]
    pub logging: bool,

    /// Write logs as JSON lines to this file instead of stderr
    #[arg(long, requires = "logging", display_order = 1000)]
    pub log_path: Option<PathBuf>,

    /// Deadline for one reconciliation in seconds
    #[arg(long, value_name = "SECONDS", display_order = 1000)]
    pub timeout: Option<u64>,

    /// Report format
    #[arg(
        short,
        long,
        value_name = "yaml|json",
        default_value = "yaml",
        value_enum,
        display_order = 1000
    )]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub subcommand: SubCommand,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Parser, Debug, Clone)]
pub enum SubCommand {
    /// Reconcile a service against an in-memory cloud seeded from a state file
    #[command(subcommand)]
    Simulate(SimulateCommand),
}

impl Command {
    pub fn init() -> Self {
        Self::parse()
    }

    pub fn log_target(&self) -> LogTarget {
        match &self.log_path {
            Some(path) => LogTarget::File(Some(path.clone())),
            None => LogTarget::Stderr,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }

    pub fn config_load_option(&self) -> ConfigLoadOption {
        let Some(path) = &self.config else {
            return ConfigLoadOption::Default;
        };

        match path.try_exists() {
            Ok(true) => ConfigLoadOption::Path(path.clone()),
            Ok(false) => {
                eprintln!("Config file not found: {:?}", path);

                ConfigLoadOption::Default
            }
            Err(err) => {
                eprintln!("Failed to check config file exists: {}", err);

                ConfigLoadOption::Default
            }
        }
    }
}
