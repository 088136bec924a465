use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use mnemo_adapters::{AdapterError, Context, MemoryType, RetrievalMethod, RetrievalResult};
use tokio::sync::Semaphore;
use tracing::debug;

use super::fusion::reciprocal_rank_fusion;
use super::strategies::{
    GraphStrategy, KeywordStrategy, RetrievalQuery, RetrievalStrategy, SemanticStrategy,
    SubgraphStrategy,
};
use crate::adapters::GuardedAdapters;
use crate::config::RetrievalConfig;
use crate::error::RetrievalError;
use crate::obs;
use crate::storage::StorageManager;

/// Runs every strategy concurrently and fuses the ranked lists with RRF.
///
/// A strategy that fails is logged and left out of fusion. The search only
/// fails when every strategy failed.
pub struct RetrievalEngine {
    strategies: Vec<Box<dyn RetrievalStrategy>>,
    workers: Arc<Semaphore>,
    rrf_k: f64,
    candidate_multiplier: usize,
    searches: AtomicU64,
}

impl RetrievalEngine {
    /// Graph, semantic, subgraph and keyword strategies over the given adapters.
    pub fn new(
        adapters: &GuardedAdapters,
        storage: Arc<StorageManager>,
        config: &RetrievalConfig,
    ) -> Self {
        let strategies: Vec<Box<dyn RetrievalStrategy>> = vec![
            Box::new(GraphStrategy::new(Arc::clone(&adapters.graph))),
            Box::new(SemanticStrategy::new(Arc::clone(&adapters.vector))),
            Box::new(SubgraphStrategy::new(Arc::clone(&adapters.vector))),
            Box::new(KeywordStrategy::new(storage)),
        ];
        Self::with_strategies(strategies, config)
    }

    pub fn with_strategies(
        strategies: Vec<Box<dyn RetrievalStrategy>>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            strategies,
            workers: Arc::new(Semaphore::new(config.max_parallel_strategies.max(1))),
            rrf_k: config.rrf_k,
            candidate_multiplier: config.candidate_multiplier.max(1),
            searches: AtomicU64::new(0),
        }
    }

    pub fn methods(&self) -> Vec<RetrievalMethod> {
        self.strategies.iter().map(|s| s.method()).collect()
    }

    /// Searches started since construction, failed ones included.
    pub fn search_count(&self) -> u64 {
        self.searches.load(Ordering::Relaxed)
    }

    pub async fn search(
        &self,
        query: &str,
        context: Option<&Context>,
        memory_type: Option<MemoryType>,
        top_k: usize,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        if query.trim().is_empty() {
            return Err(RetrievalError::InvalidQuery("query must not be empty".into()));
        }
        if top_k == 0 {
            return Err(RetrievalError::InvalidQuery("top_k must be at least 1".into()));
        }
        self.searches.fetch_add(1, Ordering::Relaxed);

        let request = RetrievalQuery {
            text: query.to_string(),
            context: context.cloned(),
            memory_type,
            limit: top_k.saturating_mul(self.candidate_multiplier),
        };

        let runs = self.strategies.iter().map(|strategy| {
            let request = &request;
            async move {
                let outcome = match self.workers.acquire().await {
                    Ok(_permit) => strategy.retrieve(request).await,
                    Err(_) => Err(AdapterError::internal("retrieval", "worker pool closed")),
                };
                (strategy.method(), outcome)
            }
        });
        let outcomes = join_all(runs).await;

        let mut rankings = Vec::with_capacity(outcomes.len());
        let mut errors = Vec::new();
        for (method, outcome) in outcomes {
            match outcome {
                Ok(mut hits) => {
                    if let Some(wanted) = memory_type {
                        hits.retain(|h| h.memory.memory_type == wanted);
                    }
                    debug!(strategy = %method, hits = hits.len(), "strategy finished");
                    rankings.push(hits);
                }
                Err(err) => {
                    obs::emit_strategy_degraded(&method.to_string(), &err);
                    errors.push(format!("{method}: {err}"));
                }
            }
        }

        if rankings.is_empty() && !errors.is_empty() {
            return Err(RetrievalError::AllStrategiesFailed {
                attempted: errors.len(),
                errors,
            });
        }
        Ok(reciprocal_rank_fusion(&rankings, self.rrf_k, top_k))
    }
}

impl std::fmt::Debug for RetrievalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalEngine")
            .field("strategies", &self.methods())
            .field("rrf_k", &self.rrf_k)
            .field("candidate_multiplier", &self.candidate_multiplier)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::Adapters;
    use crate::config::TierConfig;
    use crate::resilience::GuardPolicy;
    use mnemo_adapters::{
        GraphAdapter, InMemoryGraph, InMemoryStorage, InMemoryVectorIndex, KeywordAnalyzer,
        Memory, MemoryLayer, StorageAdapter, VectorNoteAdapter,
    };

    struct Fixture {
        engine: RetrievalEngine,
        storage: Arc<StorageManager>,
        graph: Arc<InMemoryGraph>,
        vector: Arc<InMemoryVectorIndex>,
        kv: Arc<InMemoryStorage>,
    }

    fn fixture() -> Fixture {
        let mut adapters = Adapters::in_memory(Arc::new(KeywordAnalyzer::new())).unwrap();
        let graph = Arc::new(InMemoryGraph::new());
        let vector = Arc::new(InMemoryVectorIndex::new());
        let kv = Arc::new(InMemoryStorage::new());
        adapters.graph = Arc::clone(&graph) as Arc<dyn GraphAdapter>;
        adapters.vector = Arc::clone(&vector) as Arc<dyn VectorNoteAdapter>;
        adapters.storage = Arc::clone(&kv) as Arc<dyn StorageAdapter>;

        let policy = GuardPolicy {
            retry: crate::resilience::RetryPolicy::none(),
            ..GuardPolicy::default()
        };
        let guarded = GuardedAdapters::new(adapters, &policy);
        let storage = Arc::new(StorageManager::new(&guarded, &TierConfig::default()));
        let engine = RetrievalEngine::new(&guarded, Arc::clone(&storage), &RetrievalConfig::default());
        Fixture {
            engine,
            storage,
            graph,
            vector,
            kv,
        }
    }

    #[tokio::test]
    async fn test_rejects_invalid_query() {
        let fx = fixture();
        assert!(matches!(
            fx.engine.search("   ", None, None, 5).await,
            Err(RetrievalError::InvalidQuery(_))
        ));
        assert!(matches!(
            fx.engine.search("coffee", None, None, 0).await,
            Err(RetrievalError::InvalidQuery(_))
        ));
        assert_eq!(fx.engine.search_count(), 0);
    }

    #[tokio::test]
    async fn test_fuses_hits_across_tiers() {
        let fx = fixture();
        fx.storage
            .add_memory(Memory::new("espresso needs fine coffee grind", MemoryType::Semantic))
            .await
            .unwrap();
        fx.storage
            .add_memory(
                Memory::new("user prefers coffee without sugar", MemoryType::Opinion)
                    .with_layer(MemoryLayer::Ltm),
            )
            .await
            .unwrap();

        let hits = fx.engine.search("coffee", None, None, 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.method == RetrievalMethod::Fused));
        assert_eq!(fx.engine.search_count(), 1);

        let opinions = fx
            .engine
            .search("coffee", None, Some(MemoryType::Opinion), 5)
            .await
            .unwrap();
        assert_eq!(opinions.len(), 1);
        assert_eq!(opinions[0].memory.memory_type, MemoryType::Opinion);
    }

    #[tokio::test]
    async fn test_survives_graph_outage() {
        let fx = fixture();
        fx.storage
            .add_memory(Memory::new("coffee at nine", MemoryType::Episodic))
            .await
            .unwrap();
        fx.graph.set_available(false);

        let hits = fx.engine.search("coffee", None, None, 3).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].memory.content, "coffee at nine");
    }

    #[tokio::test]
    async fn test_fails_when_every_strategy_fails() {
        let fx = fixture();
        fx.graph.set_available(false);
        fx.vector.set_available(false);
        fx.kv.set_available(false);

        match fx.engine.search("coffee", None, None, 3).await {
            Err(RetrievalError::AllStrategiesFailed { attempted, errors }) => {
                assert_eq!(attempted, 4);
                assert_eq!(errors.len(), 4);
            }
            other => panic!("expected AllStrategiesFailed, got {other:?}"),
        }
    }
}
