//! The adapter set the engine runs on, raw and guarded.

use std::sync::Arc;

use mnemo_adapters::{
    AccessAgePolicy, AnalyzerOperation, ConfigError, ContentAnalyzer, GraphAdapter,
    InMemoryGraph, InMemoryStorage, InMemoryVectorIndex, OperationAdapter, OperationConfig,
    PolicyUpdate, StorageAdapter, UpdateAdapter, VectorNoteAdapter,
};
use serde::{Deserialize, Serialize};

use crate::resilience::{BreakerState, GuardPolicy, Guarded};

/// One adapter per capability, selected at construction.
#[derive(Clone)]
pub struct Adapters {
    pub storage: Arc<dyn StorageAdapter>,
    pub graph: Arc<dyn GraphAdapter>,
    pub vector: Arc<dyn VectorNoteAdapter>,
    pub operation: Arc<dyn OperationAdapter>,
    pub update: Arc<dyn UpdateAdapter>,
}

impl Adapters {
    /// Process-local backends with the given analyzer and default settings.
    pub fn in_memory(analyzer: Arc<dyn ContentAnalyzer>) -> Result<Self, ConfigError> {
        Ok(Self {
            storage: Arc::new(InMemoryStorage::new()),
            graph: Arc::new(InMemoryGraph::new()),
            vector: Arc::new(InMemoryVectorIndex::new()),
            operation: Arc::new(AnalyzerOperation::new(&OperationConfig::default(), analyzer)?),
            update: Arc::new(PolicyUpdate::new(AccessAgePolicy::default())),
        })
    }
}

/// Liveness of one adapter as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterStatus {
    pub name: String,
    /// False when the adapter reports itself down or its breaker is open
    pub available: bool,
    pub breaker: BreakerState,
}

/// Every adapter behind its own circuit breaker. Cloning shares the breakers.
#[derive(Clone)]
pub struct GuardedAdapters {
    pub storage: Arc<Guarded<dyn StorageAdapter>>,
    pub graph: Arc<Guarded<dyn GraphAdapter>>,
    pub vector: Arc<Guarded<dyn VectorNoteAdapter>>,
    pub operation: Arc<Guarded<dyn OperationAdapter>>,
    pub update: Arc<Guarded<dyn UpdateAdapter>>,
}

fn status<A: ?Sized + mnemo_adapters::Adapter>(guarded: &Guarded<A>) -> AdapterStatus {
    AdapterStatus {
        name: guarded.name().to_string(),
        available: guarded.is_available(),
        breaker: guarded.breaker_state(),
    }
}

impl GuardedAdapters {
    pub fn new(adapters: Adapters, policy: &GuardPolicy) -> Self {
        Self {
            storage: Arc::new(Guarded::new(adapters.storage, policy)),
            graph: Arc::new(Guarded::new(adapters.graph, policy)),
            vector: Arc::new(Guarded::new(adapters.vector, policy)),
            operation: Arc::new(Guarded::new(adapters.operation, policy)),
            update: Arc::new(Guarded::new(adapters.update, policy)),
        }
    }

    /// Status of every adapter, in a fixed order.
    pub fn statuses(&self) -> Vec<AdapterStatus> {
        vec![
            status(&self.storage),
            status(&self.graph),
            status(&self.vector),
            status(&self.operation),
            status(&self.update),
        ]
    }
}
