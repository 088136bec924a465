//! Engine configuration
//!
//! One TOML document, one section per component. Adapter sections reuse the
//! types from `mnemo-adapters`; the rest are defined here. Secrets can be
//! supplied through `MNEMO_*` environment variables, which win over the file.

use std::path::Path;
use std::time::Duration;

use mnemo_adapters::{
    AccessAgePolicy, ConfigError, ErrorClass, GraphConfig, OperationConfig, StorageConfig,
    VectorNoteConfig,
};
use serde::{Deserialize, Serialize};

use crate::resilience::{BreakerConfig, GuardPolicy, RetryPolicy};

pub const ENV_GRAPH_URI: &str = "MNEMO_GRAPH_URI";
pub const ENV_GRAPH_USER: &str = "MNEMO_GRAPH_USER";
pub const ENV_GRAPH_PASSWORD: &str = "MNEMO_GRAPH_PASSWORD";
pub const ENV_STORAGE_URI: &str = "MNEMO_STORAGE_URI";
pub const ENV_EMBEDDING_URL: &str = "MNEMO_EMBEDDING_URL";

/// Upper bound for `operation_timeout_ms` (10 minutes)
pub const MAX_OPERATION_TIMEOUT_MS: u64 = 600_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub storage: StorageConfig,
    pub graph: GraphConfig,
    pub vector: VectorNoteConfig,
    pub operation: OperationConfig,
    pub orchestrator: OrchestratorConfig,
    pub cache: CacheConfig,
    pub retrieval: RetrievalConfig,
    pub resilience: ResilienceConfig,
    pub tiers: TierConfig,
    pub consolidation: ConsolidationConfig,
}

impl EngineConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        toml::from_str(input).map_err(|e| ConfigError::new("engine", e.to_string()))
    }

    /// Read a TOML file, apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::new("engine", format!("cannot read {}: {e}", path.display()))
        })?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup. Empty values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(uri) = get(ENV_GRAPH_URI) {
            self.graph.uri = Some(uri);
        }
        if let Some(user) = get(ENV_GRAPH_USER) {
            self.graph.user = Some(user);
        }
        if let Some(password) = get(ENV_GRAPH_PASSWORD) {
            self.graph.password = Some(password);
        }
        if let Some(uri) = get(ENV_STORAGE_URI) {
            self.storage.uri = Some(uri);
        }
        if let Some(url) = get(ENV_EMBEDDING_URL) {
            self.vector.embedding_service_url = Some(url);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.storage.validate()?;
        self.graph.validate()?;
        self.vector.validate()?;
        self.operation.validate()?;
        self.orchestrator.validate()?;
        self.cache.validate()?;
        self.retrieval.validate()?;
        self.resilience.validate()?;
        self.tiers.validate()?;
        self.consolidation.validate()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_concurrent_operations: usize,
    /// Deadline per public operation, including the wait for a slot
    pub operation_timeout_ms: u64,
    pub default_top_k: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_operations: 10,
            operation_timeout_ms: 30_000,
            default_top_k: 10,
        }
    }
}

impl OrchestratorConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_operations == 0 {
            return Err(ConfigError::new(
                "orchestrator",
                "max_concurrent_operations must be at least 1",
            ));
        }
        if !(1..=MAX_OPERATION_TIMEOUT_MS).contains(&self.operation_timeout_ms) {
            return Err(ConfigError::new(
                "orchestrator",
                format!(
                    "operation_timeout_ms must be within 1..={MAX_OPERATION_TIMEOUT_MS}, got {}",
                    self.operation_timeout_ms
                ),
            ));
        }
        if self.default_top_k == 0 {
            return Err(ConfigError::new("orchestrator", "default_top_k must be at least 1"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_size: usize,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            ttl_secs: 300,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::new("cache", "max_size must be at least 1"));
        }
        if self.ttl_secs == 0 {
            return Err(ConfigError::new("cache", "ttl_secs must be at least 1"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Retrieval
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// RRF constant `k` in `1 / (k + rank)`
    pub rrf_k: f64,
    pub max_parallel_strategies: usize,
    /// Each strategy fetches `top_k * candidate_multiplier` candidates
    pub candidate_multiplier: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            max_parallel_strategies: 4,
            candidate_multiplier: 3,
        }
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.rrf_k.is_finite() || self.rrf_k < 0.0 {
            return Err(ConfigError::new("retrieval", "rrf_k must be a non-negative number"));
        }
        if self.max_parallel_strategies == 0 {
            return Err(ConfigError::new(
                "retrieval",
                "max_parallel_strategies must be at least 1",
            ));
        }
        if self.candidate_multiplier == 0 {
            return Err(ConfigError::new(
                "retrieval",
                "candidate_multiplier must be at least 1",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Resilience
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
    pub half_open_max_calls: u32,
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub backoff_base: f64,
    pub max_delay_ms: u64,
    /// Deadline for a single adapter attempt
    pub call_timeout_ms: u64,
    pub retry_on: Vec<ErrorClass>,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
            half_open_max_calls: 1,
            max_retries: 2,
            initial_delay_ms: 100,
            backoff_base: 2.0,
            max_delay_ms: 5_000,
            call_timeout_ms: 10_000,
            retry_on: vec![ErrorClass::Timeout, ErrorClass::Internal],
        }
    }
}

impl ResilienceConfig {
    pub fn guard_policy(&self) -> GuardPolicy {
        GuardPolicy {
            breaker: BreakerConfig {
                failure_threshold: self.failure_threshold,
                recovery_timeout: Duration::from_millis(self.recovery_timeout_ms),
                half_open_max_calls: self.half_open_max_calls,
            },
            retry: RetryPolicy {
                max_retries: self.max_retries,
                initial_delay: Duration::from_millis(self.initial_delay_ms),
                backoff_base: self.backoff_base,
                max_delay: Duration::from_millis(self.max_delay_ms),
                retry_on: self.retry_on.clone(),
            },
            call_timeout: Duration::from_millis(self.call_timeout_ms),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::new("resilience", "failure_threshold must be at least 1"));
        }
        if self.half_open_max_calls == 0 {
            return Err(ConfigError::new(
                "resilience",
                "half_open_max_calls must be at least 1",
            ));
        }
        if !self.backoff_base.is_finite() || self.backoff_base < 1.0 {
            return Err(ConfigError::new("resilience", "backoff_base must be >= 1"));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(ConfigError::new(
                "resilience",
                "max_delay_ms must not be below initial_delay_ms",
            ));
        }
        if self.call_timeout_ms == 0 {
            return Err(ConfigError::new("resilience", "call_timeout_ms must be at least 1"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tiers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    pub foa_max_tokens: usize,
    pub foa_max_memories: usize,
    pub foa_max_age_secs: u64,
    pub da_ttl_secs: u64,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            foa_max_tokens: 4096,
            foa_max_memories: 50,
            foa_max_age_secs: 3600,
            da_ttl_secs: 7 * 24 * 3600,
        }
    }
}

impl TierConfig {
    pub fn foa_max_age(&self) -> Duration {
        Duration::from_secs(self.foa_max_age_secs)
    }

    pub fn da_ttl(&self) -> Duration {
        Duration::from_secs(self.da_ttl_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.foa_max_tokens == 0 || self.foa_max_memories == 0 {
            return Err(ConfigError::new(
                "tiers",
                "foa_max_tokens and foa_max_memories must be at least 1",
            ));
        }
        if self.foa_max_age_secs == 0 || self.da_ttl_secs == 0 {
            return Err(ConfigError::new(
                "tiers",
                "foa_max_age_secs and da_ttl_secs must be at least 1",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Consolidation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    #[serde(flatten)]
    pub policy: AccessAgePolicy,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 300,
            policy: AccessAgePolicy::default(),
        }
    }
}

impl ConsolidationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs == 0 {
            return Err(ConfigError::new("consolidation", "interval_secs must be at least 1"));
        }
        if self.policy.ltm_promote_retrievals == 0 {
            return Err(ConfigError::new(
                "consolidation",
                "ltm_promote_retrievals must be at least 1",
            ));
        }
        Ok(())
    }
}
