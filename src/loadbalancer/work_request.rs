use std::time::Duration;

use tokio::time::Instant;

use crate::{
    cloud::CloudClient,
    error::{Error, Result},
    logger,
    model::{WorkRequest, WorkRequestState},
};

use super::ReconcileContext;

/// Bounded exponential backoff for work-request polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub initial: Duration,
    pub cap: Duration,
    pub budget: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            budget: Duration::from_secs(20 * 60),
        }
    }
}

/// Polls a work request until it succeeds.
///
/// A `FAILED` work request becomes [`Error::WorkRequestFailed`]; running out
/// of the polling budget becomes [`Error::Timeout`]. In both cases the work
/// request itself is left to the cloud.
pub async fn await_work_request<C>(
    client: &C,
    ctx: &ReconcileContext,
    config: &PollConfig,
    id: &str,
) -> Result<WorkRequest>
where
    C: CloudClient + ?Sized,
{
    let started = Instant::now();
    let mut delay = config.initial;

    loop {
        let wr = ctx
            .run("GetWorkRequest", client.get_work_request(id))
            .await?;

        match wr.lifecycle_state {
            WorkRequestState::Succeeded => {
                logger!(debug, "work request {id} succeeded");
                return Ok(wr);
            }
            WorkRequestState::Failed => {
                logger!(error, "work request {id} failed: {:?}", wr.message);
                return Err(Error::WorkRequestFailed {
                    id: id.to_string(),
                    code: wr.error_code.unwrap_or_else(|| "Unknown".to_string()),
                    message: wr.message.unwrap_or_default(),
                });
            }
            WorkRequestState::Accepted | WorkRequestState::InProgress => {}
        }

        if started.elapsed() + delay > config.budget {
            return Err(Error::Timeout(format!(
                "work request {id} did not finish within {:?}",
                config.budget
            )));
        }

        ctx.sleep(delay).await?;
        delay = (delay * 2).min(config.cap);
    }
}
