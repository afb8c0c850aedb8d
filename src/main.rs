use anyhow::Result;

use oci_lb_controller::{
    app::App,
    cmd::Command,
    config::ProviderConfig,
    logging::Logger,
};

fn main() -> Result<()> {
    let cmd = Command::init();

    if cmd.logging {
        Logger::init(cmd.log_target())?;
    }

    let config = ProviderConfig::load(cmd.config_load_option())?;

    App::run(cmd, config)
}
