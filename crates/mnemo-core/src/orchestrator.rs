//! MemoryEngine: the Retain / Recall / Reflect surface.
//!
//! Every caller-facing operation runs under one deadline that covers both the
//! wait for a concurrency slot and the work itself. Maintenance passes
//! (consolidation, cleanup) never take a slot.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use mnemo_adapters::{
    AdapterError, Context, Experience, Memory, MemoryId, MemoryType, RetrievalResult, Task,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, instrument, warn, Instrument};

use crate::adapters::{AdapterStatus, Adapters, GuardedAdapters};
use crate::cache::{cache_key, RetrievalCache};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, FailureCause};
use crate::metrics::{EngineMetrics, OperationMetrics};
use crate::obs;
use crate::retrieval::RetrievalEngine;
use crate::storage::{CleanupReport, ConsolidationJob, ConsolidationReport, StorageManager, TierCounts};

/// Overall engine health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unavailable,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub adapters: Vec<AdapterStatus>,
}

impl HealthReport {
    pub fn adapter(&self, name: &str) -> Option<&AdapterStatus> {
        self.adapters.iter().find(|a| a.name == name)
    }
}

pub struct MemoryEngine {
    adapters: GuardedAdapters,
    storage: Arc<StorageManager>,
    retrieval: RetrievalEngine,
    cache: Arc<RetrievalCache>,
    metrics: OperationMetrics,
    slots: Semaphore,
    operation_timeout: Duration,
    default_top_k: usize,
    consolidation_interval: Duration,
}

fn new_operation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl MemoryEngine {
    /// Wire an engine over already constructed adapters. The config is
    /// validated first; adapter sections are not consulted here.
    pub fn with_adapters(adapters: Adapters, config: &EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let guarded = GuardedAdapters::new(adapters, &config.resilience.guard_policy());
        let storage = Arc::new(StorageManager::new(&guarded, &config.tiers));
        let retrieval = RetrievalEngine::new(&guarded, Arc::clone(&storage), &config.retrieval);

        Ok(Self {
            adapters: guarded,
            storage,
            retrieval,
            cache: Arc::new(RetrievalCache::new(config.cache.max_size, config.cache.ttl())),
            metrics: OperationMetrics::new(),
            slots: Semaphore::new(config.orchestrator.max_concurrent_operations),
            operation_timeout: config.orchestrator.operation_timeout(),
            default_top_k: config.orchestrator.default_top_k,
            consolidation_interval: config.consolidation.interval(),
        })
    }

    pub fn adapters(&self) -> &GuardedAdapters {
        &self.adapters
    }

    pub fn default_top_k(&self) -> usize {
        self.default_top_k
    }

    /// Run `work` under the operation deadline and a concurrency slot, and
    /// record its outcome.
    async fn bounded<T, Fut>(&self, operation: &'static str, work: Fut) -> Result<T, FailureCause>
    where
        Fut: Future<Output = Result<T, FailureCause>>,
    {
        let started = Instant::now();
        let limit = self.operation_timeout;
        let deadline = tokio::time::timeout(limit, async {
            let _slot = self.slots.acquire().await.map_err(|_| {
                FailureCause::Adapter(AdapterError::internal("engine", "operation slots closed"))
            })?;
            work.await
        });
        let outcome = match deadline.await {
            Ok(outcome) => outcome,
            Err(_) => Err(FailureCause::Timeout {
                limit_ms: limit.as_millis() as u64,
            }),
        };

        self.metrics
            .record(operation, started.elapsed(), outcome.is_ok());
        if let Err(err) = &outcome {
            obs::emit_operation_failed(operation, err);
        }
        outcome
    }

    /// Index a memory produced by an analysis step, then place it. When the
    /// index folds it into a near-duplicate, the survivor is re-placed.
    ///
    /// A fresh note whose placement fails is removed from the index again.
    async fn store_new(&self, memory: Memory) -> Result<(Memory, bool), FailureCause> {
        self.storage.ensure_available()?;
        let inserted = self
            .adapters
            .vector
            .call("insert", |v| {
                let memory = memory.clone();
                async move { v.insert(memory).await }
            })
            .await?;
        if inserted.deduplicated {
            let stored = self.storage.update_memory(inserted.memory).await?;
            return Ok((stored, true));
        }

        let id = inserted.memory.id.clone();
        match self.storage.add_memory(inserted.memory).await {
            Ok(stored) => Ok((stored, false)),
            Err(err) => {
                let id = &id;
                let rollback = self
                    .adapters
                    .vector
                    .call("delete", move |v| async move { v.delete(id).await })
                    .await;
                if let Err(cleanup) = rollback {
                    warn!(memory_id = %id, error = %cleanup, "unplaced note left in vector index");
                }
                Err(err.into())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Retain / Recall / Reflect
    // -----------------------------------------------------------------------

    /// Turn an experience into a stored memory.
    pub async fn retain(
        &self,
        experience: &Experience,
        context: &Context,
        operation_id: Option<&str>,
    ) -> EngineResult<Memory> {
        let operation_id = operation_id.map_or_else(new_operation_id, str::to_string);
        let span = obs::operation_span("retain", &operation_id);
        self.bounded("retain", async {
            experience.validate()?;
            let memory = self
                .adapters
                .operation
                .call("retain", move |o| async move { o.retain(experience, context).await })
                .await?;
            let (stored, deduplicated) = self.store_new(memory).await?;
            self.cache.clear();
            obs::emit_memory_retained(&stored.id, stored.layer, deduplicated);
            Ok(stored)
        })
        .instrument(span)
        .await
        .map_err(EngineError::Retain)
    }

    /// Fused retrieval across every tier, served from the cache when fresh.
    pub async fn recall(
        &self,
        query: &str,
        context: Option<&Context>,
        memory_type: Option<MemoryType>,
        top_k: usize,
    ) -> EngineResult<Vec<RetrievalResult>> {
        let span = obs::operation_span("recall", &new_operation_id());
        self.bounded("recall", async {
            if query.trim().is_empty() {
                return Err(FailureCause::Validation("query must not be empty".into()));
            }
            if top_k == 0 {
                return Err(FailureCause::Validation("top_k must be at least 1".into()));
            }
            let started = Instant::now();

            let key = cache_key(query, context, memory_type, top_k);
            let generation = self.cache.generation();
            if let Some(results) = self.cache.get(&key) {
                obs::emit_recall_completed(results.len(), true, elapsed_ms(started));
                return Ok(results);
            }

            let results = self
                .retrieval
                .search(query, context, memory_type, top_k)
                .await?;
            let ids: Vec<MemoryId> = results.iter().map(|r| r.memory.id.clone()).collect();
            if let Err(err) = self.storage.record_retrievals(&ids).await {
                warn!(error = %err, "retrieval counts not recorded");
            }
            // A write that landed during the search invalidates these results.
            self.cache.set_if_current(key, results.clone(), generation);
            obs::emit_recall_completed(results.len(), false, elapsed_ms(started));
            Ok(results)
        })
        .instrument(span)
        .await
        .map_err(EngineError::Recall)
    }

    /// Revise memories against a task. Returns the updated memories followed
    /// by the newly created ones.
    pub async fn reflect(
        &self,
        memories: &[Memory],
        task: &Task,
        context: Option<&Context>,
    ) -> EngineResult<Vec<Memory>> {
        let span = obs::operation_span("reflect", &new_operation_id());
        let context = context.cloned().unwrap_or_default();
        self.bounded("reflect", async {
            if memories.is_empty() {
                return Err(FailureCause::Validation(
                    "reflect needs at least one memory".into(),
                ));
            }
            for memory in memories {
                memory.validate()?;
            }
            task.validate()?;

            let context = &context;
            let outcome = self
                .adapters
                .operation
                .call("reflect", move |o| async move {
                    o.reflect(memories, task, context).await
                })
                .await?;

            let (updated, created) = (outcome.updated.len(), outcome.created.len());
            let mut persisted = Vec::with_capacity(updated + created);
            for memory in outcome.updated {
                persisted.push(self.storage.update_memory(memory).await?);
            }
            for memory in outcome.created {
                persisted.push(self.store_new(memory).await?.0);
            }
            self.cache.clear();
            obs::emit_reflect_completed(updated, created);
            Ok(persisted)
        })
        .instrument(span)
        .await
        .map_err(EngineError::Reflect)
    }

    // -----------------------------------------------------------------------
    // Health and metrics
    // -----------------------------------------------------------------------

    pub fn health_check(&self) -> HealthReport {
        let adapters = self.adapters.statuses();
        let up = adapters.iter().filter(|a| a.available).count();
        let status = if up == adapters.len() {
            HealthStatus::Healthy
        } else if up == 0 {
            HealthStatus::Unavailable
        } else {
            HealthStatus::Degraded
        };
        HealthReport { status, adapters }
    }

    pub fn metrics(&self) -> EngineMetrics {
        EngineMetrics {
            operations: self.metrics.snapshot(),
            cache: self.cache.stats(),
            retrievals: self.retrieval.search_count(),
        }
    }

    /// Log the current metrics as `info!` events.
    pub fn flush_metrics(&self) {
        self.metrics.flush();
        let cache = self.cache.stats();
        tracing::info!(
            metric = "flush",
            cache_hits = cache.hits,
            cache_misses = cache.misses,
            cache_evictions = cache.evictions,
            retrievals = self.retrieval.search_count(),
        );
    }

    // -----------------------------------------------------------------------
    // Maintenance and lookup
    // -----------------------------------------------------------------------

    /// One consolidation pass, outside the operation slots.
    #[instrument(skip(self))]
    pub async fn consolidate_now(&self) -> EngineResult<ConsolidationReport> {
        let started = Instant::now();
        let outcome = self.storage.consolidate(&self.adapters.update).await;
        self.metrics
            .record("consolidate", started.elapsed(), outcome.is_ok());
        let report = outcome.map_err(|e| maintenance("consolidate", e))?;
        if !report.is_empty() {
            self.cache.clear();
        }
        Ok(report)
    }

    /// Periodic consolidation on its own task, every `consolidation.interval_secs`.
    /// Passes that change tiers clear the recall cache.
    pub fn start_consolidation(&self) -> ConsolidationJob {
        debug!(interval = ?self.consolidation_interval, "starting consolidation job");
        let cache = Arc::clone(&self.cache);
        ConsolidationJob::spawn(
            Arc::clone(&self.storage),
            Arc::clone(&self.adapters.update),
            self.consolidation_interval,
            move |_| cache.clear(),
        )
    }

    /// Drop FoA and DA memories older than `max_age`. LTM is kept.
    #[instrument(skip(self))]
    pub async fn cleanup(&self, max_age: Duration) -> EngineResult<CleanupReport> {
        let started = Instant::now();
        let outcome = self.storage.cleanup(max_age).await;
        self.metrics
            .record("cleanup", started.elapsed(), outcome.is_ok());
        let report = outcome.map_err(|e| maintenance("cleanup", e))?;
        if report.removed_count() > 0 {
            self.cache.clear();
        }
        Ok(report)
    }

    /// Delete a memory from every tier. Returns false when it was unknown.
    pub async fn forget(&self, id: &MemoryId) -> EngineResult<bool> {
        let removed = self
            .bounded("forget", async { Ok(self.storage.delete_memory(id).await?) })
            .await
            .map_err(|cause| EngineError::Maintenance {
                operation: "forget",
                cause,
            })?;
        if removed {
            self.cache.clear();
        }
        Ok(removed)
    }

    pub async fn get_memory(&self, id: &MemoryId) -> EngineResult<Option<Memory>> {
        self.bounded("get", async { Ok(self.storage.get_memory(id).await?) })
            .await
            .map_err(|cause| EngineError::Maintenance {
                operation: "get",
                cause,
            })
    }

    pub async fn tier_counts(&self) -> EngineResult<TierCounts> {
        self.storage
            .tier_counts()
            .await
            .map_err(|e| maintenance("tier_counts", e))
    }
}

fn maintenance(operation: &'static str, err: AdapterError) -> EngineError {
    EngineError::Maintenance {
        operation,
        cause: FailureCause::Adapter(err),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("retrieval", &self.retrieval)
            .field("operation_timeout", &self.operation_timeout)
            .field("available_slots", &self.slots.available_permits())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_adapters::{KeywordAnalyzer, MemoryLayer};

    fn engine() -> MemoryEngine {
        let adapters = Adapters::in_memory(Arc::new(KeywordAnalyzer::new())).unwrap();
        MemoryEngine::with_adapters(adapters, &EngineConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_retain_then_recall() {
        let engine = engine();
        let ctx = Context::session("s1");
        let m = engine
            .retain(&Experience::new("The deploy key rotates every Friday"), &ctx, Some("op-1"))
            .await
            .unwrap();
        assert_eq!(m.content, "The deploy key rotates every Friday");
        assert_eq!(m.layer, MemoryLayer::Foa);

        let hits = engine.recall("deploy key", Some(&ctx), None, 5).await.unwrap();
        assert_eq!(hits[0].memory.id, m.id);

        let stats = engine.metrics().operations;
        assert_eq!(stats["retain"].success_count, 1);
        assert_eq!(stats["recall"].success_count, 1);
    }

    #[tokio::test]
    async fn test_recall_validates_before_search() {
        let engine = engine();
        let err = engine.recall("  ", None, None, 5).await.unwrap_err();
        assert!(err.is_validation());
        assert!(matches!(err, EngineError::Recall(_)));
        let err = engine.recall("coffee", None, None, 0).await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(engine.metrics().retrievals, 0);
    }

    #[tokio::test]
    async fn test_reflect_rejects_empty_input() {
        let engine = engine();
        let err = engine
            .reflect(&[], &Task::new("review", "learn"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Reflect(FailureCause::Validation(_))));
    }

    #[tokio::test]
    async fn test_forget_and_get() {
        let engine = engine();
        let m = engine
            .retain(&Experience::new("Temporary scratch note"), &Context::default(), None)
            .await
            .unwrap();
        assert!(engine.get_memory(&m.id).await.unwrap().is_some());
        assert!(engine.forget(&m.id).await.unwrap());
        assert!(engine.get_memory(&m.id).await.unwrap().is_none());
        assert!(!engine.forget(&m.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_health_all_in_memory_is_healthy() {
        let report = engine().health_check();
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.adapters.len(), 5);
        assert!(report.adapter("graph").unwrap().available);
    }
}
