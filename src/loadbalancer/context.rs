use std::{future::Future, time::Duration};

use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Cancellation signal and deadline carried through one reconciliation.
///
/// Every cloud call and every pause between work-request polls goes through
/// [`ReconcileContext::run`] or [`ReconcileContext::sleep`], so both are
/// observed at each suspension point.
#[derive(Debug, Clone, Default)]
pub struct ReconcileContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl ReconcileContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Err(Error::Timeout("reconciliation deadline exceeded".into()))
            }
            _ => Ok(()),
        }
    }

    async fn expired(&self) {
        match self.deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    /// Runs one suspending step, aborting it on cancellation or deadline.
    pub async fn run<T, F>(&self, step: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.checkpoint()?;

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = self.expired() => Err(Error::Timeout(format!("deadline exceeded during {step}"))),
            res = fut => res,
        }
    }

    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.run("backoff", async {
            sleep(duration).await;
            Ok(())
        })
        .await
    }
}
