use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::logger;

/// Cancels `token` on Ctrl-C or SIGTERM. A second signal exits right away.
pub fn signal_handler(token: CancellationToken) -> Result<()> {
    ctrlc::set_handler(move || {
        if token.is_cancelled() {
            std::process::exit(130);
        }

        logger!(warn, "interrupted, cancelling reconciliation");
        eprintln!("Interrupted, cancelling reconciliation");

        token.cancel();
    })?;

    Ok(())
}
