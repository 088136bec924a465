//! Adapter wrapper applying breaker, retry and per-attempt timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use mnemo_adapters::{Adapter, AdapterError, AdapterResult};
use tokio::time::Instant;
use tracing::warn;

use super::breaker::{BreakerConfig, BreakerState, CircuitBreaker};
use super::retry::RetryPolicy;

/// Everything a [`Guarded`] adapter needs besides the adapter itself.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardPolicy {
    pub breaker: BreakerConfig,
    pub retry: RetryPolicy,
    pub call_timeout: Duration,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self {
            breaker: BreakerConfig::default(),
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(10),
        }
    }
}

/// An adapter behind its own circuit breaker.
///
/// Order per call: breaker admission, then retries, each attempt bounded by
/// `call_timeout`. One breaker outcome is recorded per call, after retries.
/// A HalfOpen trial call that is cancelled before it finishes counts as a
/// failed trial.
pub struct Guarded<A: ?Sized> {
    adapter: Arc<A>,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl<A: ?Sized + Adapter> Guarded<A> {
    pub fn new(adapter: Arc<A>, policy: &GuardPolicy) -> Self {
        let breaker = CircuitBreaker::new(adapter.name(), policy.breaker.clone());
        Self {
            adapter,
            breaker,
            retry: policy.retry.clone(),
            call_timeout: policy.call_timeout,
        }
    }

    pub fn name(&self) -> &str {
        self.adapter.name()
    }

    pub fn inner(&self) -> &Arc<A> {
        &self.adapter
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    /// Available when the adapter says so and its breaker is not open.
    pub fn is_available(&self) -> bool {
        self.adapter.is_available() && self.breaker.state() != BreakerState::Open
    }

    /// Run one logical adapter call.
    pub async fn call<T, F, Fut>(&self, op: &'static str, f: F) -> AdapterResult<T>
    where
        F: Fn(Arc<A>) -> Fut,
        Fut: Future<Output = AdapterResult<T>>,
    {
        let permit = self.breaker.try_acquire()?;

        let result = self
            .retry
            .run(|_| {
                let fut = f(Arc::clone(&self.adapter));
                async move {
                    let started = Instant::now();
                    match tokio::time::timeout(self.call_timeout, fut).await {
                        Ok(out) => out,
                        Err(_) => Err(AdapterError::Timeout {
                            adapter: self.name().to_string(),
                            elapsed_ms: started.elapsed().as_millis() as u64,
                        }),
                    }
                }
            })
            .await;

        match &result {
            Err(err) if err.class().is_dependency_failure() => {
                warn!(adapter = self.name(), op, error = %err, "adapter call failed");
                permit.fail();
            }
            _ => permit.succeed(),
        }
        result
    }
}

impl<A: ?Sized> std::fmt::Debug for Guarded<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guarded")
            .field("breaker", &self.breaker)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}
