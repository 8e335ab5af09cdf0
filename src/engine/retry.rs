//! Bounded retry with linear backoff for network-facing calls.

use crate::config::Config;
use crate::error::{RelayError, Result};
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, first one included.
    pub max_attempts: u32,
    pub backoff: Duration,
    /// Wait imposed after a `RateLimit` error instead of the backoff.
    pub rate_limit_wait: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.retry.max_retries.max(1),
            backoff: Duration::from_millis(config.retry.backoff_ms),
            rate_limit_wait: config.upload_delay(),
        }
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32, err: &RelayError) -> Duration {
        match err {
            RelayError::RateLimit(_) => self.rate_limit_wait,
            _ => self.backoff * attempt,
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or uses up
/// `max_attempts`. The closure receives the 1-based attempt number.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let wait = policy.delay_for(attempt, &e);
                tracing::warn!(
                    op = what,
                    attempt,
                    max_attempts = policy.max_attempts,
                    wait_ms = wait.as_millis() as u64,
                    error = %e,
                    "attempt failed, retrying"
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::warn!(op = what, attempts = attempt, error = %e, "retries exhausted");
                }
                return Err(e);
            }
        }
    }
}
