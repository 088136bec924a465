//! Fault isolation for adapter calls.
//!
//! - `CircuitBreaker`: stops calling a failing dependency for a cooldown
//! - `RetryPolicy`: exponential backoff over transient error classes
//! - `Guarded`: an adapter wrapped in both, plus a per-attempt timeout

pub mod breaker;
pub mod guard;
pub mod retry;

pub use breaker::{BreakerConfig, BreakerPermit, BreakerState, CircuitBreaker};
pub use guard::{GuardPolicy, Guarded};
pub use retry::RetryPolicy;
