use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::{
    cmd::{Command, OutputFormat, SubCommand},
    config::ProviderConfig,
    loadbalancer::ReconcileContext,
    logger,
    signal::signal_handler,
};

pub struct App;

impl App {
    pub fn run(cmd: Command, config: ProviderConfig) -> Result<()> {
        let token = CancellationToken::new();
        signal_handler(token.clone())?;

        let mut ctx = ReconcileContext::new(token);
        if let Some(timeout) = cmd.timeout() {
            ctx = ctx.with_timeout(timeout);
        }

        let output = cmd.output;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;

        let report = runtime.block_on(async move {
            match cmd.subcommand {
                SubCommand::Simulate(simulate) => simulate.run(config, ctx).await,
            }
        })?;

        logger!(info, "{} cloud calls recorded", report.calls.len());

        match output {
            OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&report)?),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        }

        Ok(())
    }
}
