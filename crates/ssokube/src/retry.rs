//! Retry with exponential backoff for transient failures.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::OrchestratorConfig;
use crate::error::{Error, Result};

/// Retries retryable failures with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub backoff_base: Duration,
    /// Upper bound for any single delay.
    pub backoff_max: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32, backoff_base: Duration) -> Self {
        Self {
            max_retries,
            backoff_base,
            backoff_max: Duration::MAX,
        }
    }

    #[must_use]
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            max_retries: config.max_retries(),
            backoff_base: config.backoff_base(),
            backoff_max: config.backoff_max(),
        }
    }

    /// Delay after failed attempt number `attempt` (1-based):
    /// `backoff_base * 2^(attempt-1)`, capped at `backoff_max`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.backoff_base
            .saturating_mul(1_u32 << exp)
            .min(self.backoff_max)
    }

    /// Run `op`, retrying retryable failures.
    ///
    /// Non-retryable failures are returned at once. When the budget is spent
    /// the last error is wrapped in [`Error::RetriesExhausted`]. Backoff
    /// sleeps end early with [`Error::Cancelled`] when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error, `RetriesExhausted`, or
    /// `Cancelled`.
    pub async fn execute<O, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<O>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<O>>,
    {
        let mut attempt: u32 = 1;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt > self.max_retries => {
                    warn!(attempts = attempt, error = %e, "Retries exhausted");
                    return Err(Error::RetriesExhausted {
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.delay_for_attempt(attempt);
                    debug!(attempt, delay = ?delay, error = %e, "Retrying after transient failure");
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return Err(Error::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&OrchestratorConfig::default())
    }
}
