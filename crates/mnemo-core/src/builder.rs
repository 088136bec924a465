//! Construct an engine from configuration.

use std::sync::Arc;

use mnemo_adapters::config::{BACKEND_INMEMORY, BACKEND_SURREALDB};
use mnemo_adapters::{
    AdapterError, AnalyzerOperation, ConfigError, ContentAnalyzer, GraphAdapter, InMemoryGraph,
    InMemoryStorage, InMemoryVectorIndex, PolicyUpdate, StorageAdapter, SurrealGraph,
    SurrealStorage,
};
use tracing::info;

use crate::adapters::Adapters;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::orchestrator::MemoryEngine;

fn startup(err: AdapterError) -> EngineError {
    EngineError::Startup(err.to_string())
}

fn unknown_backend(section: &str, backend: &str) -> EngineError {
    ConfigError::new(section, format!("unknown backend `{backend}`")).into()
}

/// Select and connect every backend named by the config.
pub async fn build_adapters(
    config: &EngineConfig,
    analyzer: Arc<dyn ContentAnalyzer>,
) -> EngineResult<Adapters> {
    config.validate()?;

    let storage: Arc<dyn StorageAdapter> = match config.storage.backend.as_str() {
        BACKEND_INMEMORY => Arc::new(InMemoryStorage::new()),
        BACKEND_SURREALDB => Arc::new(
            SurrealStorage::from_config(&config.storage)
                .await
                .map_err(startup)?,
        ),
        other => return Err(unknown_backend("storage", other)),
    };

    let graph: Arc<dyn GraphAdapter> = match config.graph.backend.as_str() {
        BACKEND_INMEMORY => Arc::new(InMemoryGraph::new()),
        BACKEND_SURREALDB => Arc::new(
            SurrealGraph::from_config(&config.graph)
                .await
                .map_err(startup)?,
        ),
        other => return Err(unknown_backend("graph", other)),
    };

    let vector = Arc::new(InMemoryVectorIndex::from_config(&config.vector)?);
    let operation = Arc::new(AnalyzerOperation::new(&config.operation, analyzer)?);
    let update = Arc::new(PolicyUpdate::new(config.consolidation.policy.clone()));

    info!(
        storage = %config.storage.backend,
        graph = %config.graph.backend,
        vector = %config.vector.backend,
        "adapters constructed"
    );
    Ok(Adapters {
        storage,
        graph,
        vector,
        operation,
        update,
    })
}

impl MemoryEngine {
    /// Validate the config, connect the configured backends and wire the
    /// engine. Bad configuration is reported before anything connects.
    pub async fn from_config(
        config: EngineConfig,
        analyzer: Arc<dyn ContentAnalyzer>,
    ) -> EngineResult<Self> {
        let adapters = build_adapters(&config, analyzer).await?;
        Self::with_adapters(adapters, &config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_adapters::{Context, Experience, KeywordAnalyzer};

    #[tokio::test]
    async fn test_default_config_builds_in_memory_engine() {
        let engine = MemoryEngine::from_config(EngineConfig::default(), Arc::new(KeywordAnalyzer::new()))
            .await
            .unwrap();
        let m = engine
            .retain(&Experience::new("Builds run on Tuesdays"), &Context::default(), None)
            .await
            .unwrap();
        assert!(!m.id.is_empty());
    }

    #[tokio::test]
    async fn test_surreal_without_uri_is_config_error() {
        let mut config = EngineConfig::default();
        config.graph.backend = BACKEND_SURREALDB.into();
        config.graph.uri = None;

        let err = MemoryEngine::from_config(config, Arc::new(KeywordAnalyzer::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[tokio::test]
    async fn test_unknown_backend_rejected() {
        let mut config = EngineConfig::default();
        config.storage.backend = "redis".into();
        let err = build_adapters(&config, Arc::new(KeywordAnalyzer::new()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
