//! mnemo-adapters: data model and backend adapters for mnemo
//!
//! This crate isolates the memory engine from its backends. It defines the
//! data model shared by every layer and one capability trait per backend
//! concern.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: data integrity, similarity search, graph traversal.
//!
//! ## Key Components
//!
//! - `Memory` / `Experience` / `Entity` / `Relation`: the data model
//! - `StorageAdapter`, `GraphAdapter`, `VectorNoteAdapter`,
//!   `OperationAdapter`, `UpdateAdapter`: capability traits
//! - `inmemory`: process-local backends (default)
//! - `SurrealGraph` / `SurrealStorage`: SurrealDB backends
//! - `KeywordAnalyzer`: built-in lexical content analyzer

pub mod analysis;
pub mod config;
pub mod embedding;
mod error;
pub mod inmemory;
pub mod model;
pub mod operation;
pub mod surreal;
pub mod surreal_graph;
pub mod surreal_storage;
pub mod text;
pub mod traits;
pub mod update;

pub use analysis::{ContentAnalysis, ContentAnalyzer, KeywordAnalyzer, Revision};
pub use config::{GraphConfig, OperationConfig, StorageConfig, VectorNoteConfig};
pub use embedding::{Embedder, HashingEmbedder, HttpEmbedder};
pub use error::{AdapterError, AdapterResult, ConfigError, ErrorClass, ModelError};
pub use inmemory::{InMemoryGraph, InMemoryStorage, InMemoryVectorIndex};
pub use model::{
    Context, Entity, EntityRef, Experience, Memory, MemoryId, MemoryLayer, MemoryType, Metadata,
    Relation, RetrievalMethod, RetrievalResult, Task,
};
pub use operation::AnalyzerOperation;
pub use surreal_graph::SurrealGraph;
pub use surreal_storage::SurrealStorage;
pub use traits::{
    Adapter, ConsolidationPlan, EntityMatch, GraphAdapter, NoteInsert, OperationAdapter,
    PlannedMemory, ReflectOutcome, ScoredMemory, StorageAdapter, UpdateAdapter,
    VectorNoteAdapter,
};
pub use update::{AccessAgePolicy, ConsolidationPolicy, PolicyUpdate};
