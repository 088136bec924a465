//! Circuit breaker: Closed → Open → HalfOpen → Closed.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use mnemo_adapters::AdapterError;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker
    pub failure_threshold: u32,
    /// Time after the last failure before a trial call is admitted
    pub recovery_timeout: Duration,
    /// Trial calls admitted in HalfOpen; this many successes close it
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 1,
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    half_open_in_flight: u32,
    half_open_successes: u32,
}

/// Mutex-protected breaker guarding one adapter.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                half_open_in_flight: 0,
                half_open_successes: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn recovery_elapsed(&self, inner: &Inner) -> bool {
        inner
            .last_failure
            .is_some_and(|at| at.elapsed() >= self.config.recovery_timeout)
    }

    /// Current state. An open breaker whose recovery timeout elapsed reports
    /// `HalfOpen`.
    pub fn state(&self) -> BreakerState {
        let inner = self.lock();
        match inner.state {
            BreakerState::Open if self.recovery_elapsed(&inner) => BreakerState::HalfOpen,
            state => state,
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Admit or reject a call. The returned permit must be settled with
    /// [`BreakerPermit::succeed`] or [`BreakerPermit::fail`]; a trial permit
    /// dropped unsettled (the call was cancelled) counts as a failed trial.
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>, AdapterError> {
        let mut inner = self.lock();
        if inner.state == BreakerState::Open {
            if !self.recovery_elapsed(&inner) {
                return Err(AdapterError::CircuitOpen {
                    adapter: self.name.clone(),
                    consecutive_failures: inner.consecutive_failures,
                });
            }
            inner.state = BreakerState::HalfOpen;
            inner.half_open_in_flight = 0;
            inner.half_open_successes = 0;
            info!(adapter = %self.name, "circuit breaker half-open");
        }
        let trial = inner.state == BreakerState::HalfOpen;
        if trial {
            if inner.half_open_in_flight + inner.half_open_successes
                >= self.config.half_open_max_calls
            {
                return Err(AdapterError::CircuitOpen {
                    adapter: self.name.clone(),
                    consecutive_failures: inner.consecutive_failures,
                });
            }
            inner.half_open_in_flight += 1;
        }
        Ok(BreakerPermit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    fn record_success(&self, trial: bool) {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => inner.consecutive_failures = 0,
            BreakerState::HalfOpen if trial => {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_max_calls {
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    inner.last_failure = None;
                    inner.half_open_successes = 0;
                    info!(adapter = %self.name, "circuit breaker closed");
                }
            }
            _ => {}
        }
    }

    fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures += 1;
        inner.last_failure = Some(Instant::now());
        match inner.state {
            BreakerState::Closed if inner.consecutive_failures >= self.config.failure_threshold => {
                inner.state = BreakerState::Open;
                warn!(
                    adapter = %self.name,
                    failures = inner.consecutive_failures,
                    "circuit breaker opened"
                );
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.half_open_in_flight = 0;
                inner.half_open_successes = 0;
                warn!(adapter = %self.name, "trial call failed, circuit breaker reopened");
            }
            _ => {}
        }
    }
}

/// Admission for one call through a [`CircuitBreaker`].
#[derive(Debug)]
#[must_use = "settle the permit with succeed() or fail()"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl BreakerPermit<'_> {
    /// Whether this call is a HalfOpen trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn succeed(mut self) {
        self.settled = true;
        self.breaker.record_success(self.trial);
    }

    pub fn fail(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if self.settled || !self.trial {
            return;
        }
        if self.breaker.lock().state != BreakerState::HalfOpen {
            return;
        }
        warn!(adapter = %self.breaker.name, "trial call abandoned");
        self.breaker.record_failure();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, half_open: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "graph",
            BreakerConfig {
                failure_threshold: threshold,
                recovery_timeout: Duration::from_secs(10),
                half_open_max_calls: half_open,
            },
        )
    }

    #[test]
    fn starts_closed() {
        let cb = breaker(3, 1);
        assert_eq!(cb.state(), BreakerState::Closed);
        assert_eq!(cb.failure_count(), 0);
        cb.try_acquire().unwrap().succeed();
    }

    #[test]
    fn opens_at_threshold() {
        let cb = breaker(3, 1);
        cb.try_acquire().unwrap().fail();
        cb.try_acquire().unwrap().fail();
        assert_eq!(cb.state(), BreakerState::Closed);
        cb.try_acquire().unwrap().fail();
        assert_eq!(cb.state(), BreakerState::Open);
        let err = cb.try_acquire().unwrap_err();
        assert!(matches!(
            err,
            AdapterError::CircuitOpen {
                consecutive_failures: 3,
                ..
            }
        ));
    }

    #[test]
    fn success_resets_count_while_closed() {
        let cb = breaker(3, 1);
        cb.try_acquire().unwrap().fail();
        cb.try_acquire().unwrap().fail();
        cb.try_acquire().unwrap().succeed();
        assert_eq!(cb.failure_count(), 0);
        cb.try_acquire().unwrap().fail();
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_after_recovery_then_closes() {
        let cb = breaker(1, 2);
        cb.try_acquire().unwrap().fail();
        assert!(cb.try_acquire().is_err());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cb.state(), BreakerState::HalfOpen);

        let first = cb.try_acquire().unwrap();
        let second = cb.try_acquire().unwrap();
        assert!(first.is_trial() && second.is_trial());
        // Only two trial calls may be in flight.
        assert!(cb.try_acquire().is_err());

        first.succeed();
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        second.succeed();
        assert_eq!(cb.state(), BreakerState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens() {
        let cb = breaker(1, 1);
        cb.try_acquire().unwrap().fail();
        tokio::time::advance(Duration::from_secs(11)).await;
        cb.try_acquire().unwrap().fail();

        assert_eq!(cb.state(), BreakerState::Open);
        assert!(cb.try_acquire().is_err());

        tokio::time::advance(Duration::from_secs(10)).await;
        cb.try_acquire().unwrap().succeed();
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_trial_reopens_then_recovers() {
        let cb = breaker(1, 1);
        cb.try_acquire().unwrap().fail();
        tokio::time::advance(Duration::from_secs(10)).await;

        drop(cb.try_acquire().unwrap());
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(cb.try_acquire().is_err());

        tokio::time::advance(Duration::from_secs(10)).await;
        cb.try_acquire().unwrap().succeed();
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn dropped_closed_permit_changes_nothing() {
        let cb = breaker(1, 1);
        drop(cb.try_acquire().unwrap());
        assert_eq!(cb.state(), BreakerState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }
}
