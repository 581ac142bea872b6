//! Retry with jittered exponential backoff for upstream API calls.

use crate::core::{BackoffConfig, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry policy applied around every upstream page request.
///
/// Delay for attempt `i` is `min(base * 2^i * (1 + jitter), max_backoff)`
/// with jitter drawn uniformly from `[0, 1]`. Only errors carrying one of
/// the configured HTTP statuses are retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    jitter_base: Duration,
    max_backoff: Duration,
    retry_statuses: Vec<u16>,
}

impl RetryPolicy {
    /// Build a policy from the backoff configuration.
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            jitter_base: config.jitter_base,
            max_backoff: config.max_backoff,
            retry_statuses: config.retry_statuses.clone(),
        }
    }

    /// Compute the backoff delay for a zero-based attempt index.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = 2f64.powi(attempt.min(31) as i32);
        let jitter: f64 = rand::random();
        let delay = self.jitter_base.as_secs_f64() * exponent * (1.0 + jitter);
        Duration::from_secs_f64(delay.min(self.max_backoff.as_secs_f64()))
    }

    /// Run `operation`, retrying on configured statuses up to `max_retries`
    /// times.
    pub async fn run<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if attempt >= self.max_retries || !error.is_retryable(&self.retry_statuses) {
                        return Err(error);
                    }
                    let backoff = self.delay(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %error,
                        "retrying upstream request"
                    );
                    sleep(backoff).await;
                    attempt += 1;
                },
            }
        }
    }
}
