//! Exponential backoff retry.

use std::future::Future;
use std::time::Duration;

use mnemo_adapters::{AdapterError, AdapterResult, ErrorClass};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Extra attempts after the first
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_base: f64,
    pub max_delay: Duration,
    /// Error classes worth another attempt
    pub retry_on: Vec<ErrorClass>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(100),
            backoff_base: 2.0,
            max_delay: Duration::from_secs(5),
            retry_on: vec![ErrorClass::Timeout, ErrorClass::Internal],
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry `attempt` (0-indexed):
    /// `min(initial_delay * backoff_base^attempt, max_delay)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_base.powi(attempt.min(i32::MAX as u32) as i32);
        let secs = self.initial_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    pub fn should_retry(&self, err: &AdapterError) -> bool {
        self.retry_on.contains(&err.class())
    }

    /// Run `attempt_fn` until it succeeds, returns a non-retryable error, or
    /// the retries are used up. The last error is returned.
    pub async fn run<T, F, Fut>(&self, mut attempt_fn: F) -> AdapterResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = AdapterResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match attempt_fn(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_retries && self.should_retry(&err) => {
                    let delay = self.delay_for(attempt);
                    debug!(
                        adapter = err.adapter(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying adapter call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
