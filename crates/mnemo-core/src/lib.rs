//! mnemo-core: the layered memory engine
//!
//! Retain, Recall and Reflect over three memory tiers, with every backend
//! reached through a guarded adapter.
//!
//! ## Layer 1 - Engine
//!
//! Focus: tier lifecycle, fused retrieval, bounded concurrency, fault
//! isolation.
//!
//! ## Key Components
//!
//! - `MemoryEngine`: the public Retain / Recall / Reflect surface
//! - `StorageManager`: FoA buffers, DA records, LTM graph, consolidation
//! - `RetrievalEngine`: graph, semantic, subgraph and keyword strategies
//!   fused with Reciprocal Rank Fusion
//! - `RetrievalCache`: LRU + TTL cache of recall results
//! - `resilience`: circuit breaker, retry with backoff, per-call timeout

pub mod adapters;
pub mod builder;
pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod resilience;
pub mod retrieval;
pub mod storage;
pub mod telemetry;

pub use adapters::{AdapterStatus, Adapters, GuardedAdapters};
pub use builder::build_adapters;
pub use cache::{cache_key, CacheStats, RetrievalCache};
pub use config::{
    CacheConfig, ConsolidationConfig, EngineConfig, OrchestratorConfig, ResilienceConfig,
    RetrievalConfig, TierConfig,
};
pub use error::{EngineError, EngineResult, FailureCause, RetrievalError};
pub use metrics::{EngineMetrics, OperationMetrics, OperationStats};
pub use orchestrator::{HealthReport, HealthStatus, MemoryEngine};
pub use resilience::{
    BreakerConfig, BreakerState, CircuitBreaker, GuardPolicy, Guarded, RetryPolicy,
};
pub use retrieval::{reciprocal_rank_fusion, RetrievalEngine, RetrievalStrategy};
pub use storage::{
    CleanupReport, ConsolidationJob, ConsolidationReport, FoaBuffer, FoaLimits, StorageManager,
    TierCounts, TierMove,
};
pub use telemetry::init_tracing;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
