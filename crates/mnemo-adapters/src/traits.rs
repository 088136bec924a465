//! Adapter trait definitions for mnemo
//!
//! These traits define the backend capabilities the engine depends on:
//! - `StorageAdapter`: key-value tier storage with TTL (DA tier)
//! - `GraphAdapter`: entity / relationship queries (LTM tier)
//! - `VectorNoteAdapter`: atomic notes, similarity search, links, dedup
//! - `OperationAdapter`: experience → memory and reflection via content analysis
//! - `UpdateAdapter`: background consolidation planning
//!
//! All traits are async and backend-agnostic. Every adapter reports liveness
//! through [`Adapter::is_available`] and fails with a typed [`AdapterError`](crate::AdapterError).

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AdapterError, AdapterResult};
use crate::model::{Context, Entity, Experience, Memory, MemoryId, MemoryLayer, Relation, Task};

/// Contract shared by every adapter.
pub trait Adapter: Send + Sync {
    /// Stable adapter name used in errors, logs and health reports.
    fn name(&self) -> &str;

    /// Cheap, side-effect-free liveness check.
    fn is_available(&self) -> bool;
}

/// Liveness switch for adapters that have no remote end to probe.
#[derive(Debug)]
pub(crate) struct Availability(AtomicBool);

impl Default for Availability {
    fn default() -> Self {
        Self(AtomicBool::new(true))
    }
}

impl Availability {
    pub(crate) fn get(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn set(&self, available: bool) {
        self.0.store(available, Ordering::SeqCst);
    }

    pub(crate) fn ensure(&self, adapter: &str) -> AdapterResult<()> {
        if self.get() {
            Ok(())
        } else {
            Err(AdapterError::not_available(adapter))
        }
    }
}

// ---------------------------------------------------------------------------
// StorageAdapter: DA tier key-value storage
// ---------------------------------------------------------------------------

/// Key-value memory storage keyed by memory id.
///
/// Guarantees:
/// - `put` overwrites any previous record with the same id.
/// - Records whose TTL elapsed are never returned by `get` or `list`.
#[async_trait]
pub trait StorageAdapter: Adapter {
    /// Store a memory, optionally expiring after `ttl`.
    async fn put(&self, memory: &Memory, ttl: Option<Duration>) -> AdapterResult<()>;

    /// Fetch a live record.
    async fn get(&self, id: &MemoryId) -> AdapterResult<Option<Memory>>;

    /// Delete a record. Returns whether something was removed.
    async fn delete(&self, id: &MemoryId) -> AdapterResult<bool>;

    /// All live records.
    async fn list(&self) -> AdapterResult<Vec<Memory>>;
}

// ---------------------------------------------------------------------------
// GraphAdapter: entities, relations and long-term memory nodes
// ---------------------------------------------------------------------------

/// An entity matched against a query, with a match score in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMatch {
    pub entity: Entity,
    pub score: f64,
}

#[async_trait]
pub trait GraphAdapter: Adapter {
    async fn upsert_entity(&self, entity: &Entity) -> AdapterResult<()>;

    /// Insert or replace the relation identified by (source, target, type).
    async fn upsert_relation(&self, relation: &Relation) -> AdapterResult<()>;

    /// Store a memory node and its `mentions` edges (one per `memory.entities`).
    async fn upsert_memory(&self, memory: &Memory) -> AdapterResult<()>;

    async fn get_memory(&self, id: &MemoryId) -> AdapterResult<Option<Memory>>;

    /// Remove a memory node and its mention edges.
    async fn delete_memory(&self, id: &MemoryId) -> AdapterResult<bool>;

    /// Entities whose name matches the query, best first.
    async fn find_entities(&self, query: &str, limit: usize) -> AdapterResult<Vec<EntityMatch>>;

    /// Memories that mention the entity, newest first.
    async fn memories_for_entity(&self, entity_id: &str) -> AdapterResult<Vec<Memory>>;

    /// Relations touching the entity in either direction.
    async fn relations(&self, entity_id: &str) -> AdapterResult<Vec<Relation>>;
}

// ---------------------------------------------------------------------------
// VectorNoteAdapter: atomic notes and similarity search
// ---------------------------------------------------------------------------

/// Outcome of indexing a memory.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteInsert {
    /// The stored memory: the new one, or the existing one it was merged into
    pub memory: Memory,
    pub deduplicated: bool,
    /// Similarity to the existing note when deduplicated
    pub similarity: Option<f32>,
}

/// A memory with its cosine similarity to a query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMemory {
    pub memory: Memory,
    pub score: f32,
}

/// Similarity index of atomic notes.
///
/// Guarantees:
/// - `insert` either stores a new note (linking it symmetrically to its most
///   similar neighbours) or merges it into an existing near-duplicate.
/// - `delete` removes the note from every neighbour's `links`.
#[async_trait]
pub trait VectorNoteAdapter: Adapter {
    async fn insert(&self, memory: Memory) -> AdapterResult<NoteInsert>;

    /// Replace an existing note in place. `NotFound` if absent.
    async fn update(&self, memory: &Memory) -> AdapterResult<Memory>;

    async fn delete(&self, id: &MemoryId) -> AdapterResult<bool>;

    async fn get(&self, id: &MemoryId) -> AdapterResult<Option<Memory>>;

    async fn list(&self) -> AdapterResult<Vec<Memory>>;

    /// k-nearest notes to the query text, most similar first.
    async fn search(&self, query: &str, k: usize) -> AdapterResult<Vec<ScoredMemory>>;

    /// Bump `retrieval_count` on each listed note that exists.
    async fn record_retrievals(&self, ids: &[MemoryId]) -> AdapterResult<()>;
}

// ---------------------------------------------------------------------------
// OperationAdapter: content analysis
// ---------------------------------------------------------------------------

/// Memories produced by a reflection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReflectOutcome {
    /// Revised versions of the input memories (same ids)
    pub updated: Vec<Memory>,
    /// New experience-typed memories capturing a lesson
    pub created: Vec<Memory>,
}

impl ReflectOutcome {
    pub fn into_memories(self) -> Vec<Memory> {
        self.updated.into_iter().chain(self.created).collect()
    }
}

#[async_trait]
pub trait OperationAdapter: Adapter {
    /// Turn a raw experience into a classified, structured memory.
    async fn retain(&self, experience: &Experience, context: &Context) -> AdapterResult<Memory>;

    /// Revise memories in light of a task.
    async fn reflect(
        &self,
        memories: &[Memory],
        task: &Task,
        context: &Context,
    ) -> AdapterResult<ReflectOutcome>;
}

// ---------------------------------------------------------------------------
// UpdateAdapter: consolidation ("sleep update")
// ---------------------------------------------------------------------------

/// One memory in a consolidation plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedMemory {
    /// Final state; `memory.layer` is the target tier
    pub memory: Memory,
    pub previous_layer: MemoryLayer,
}

impl PlannedMemory {
    pub fn moves(&self) -> bool {
        self.memory.layer != self.previous_layer
    }
}

/// What a consolidation run should change. Memories not mentioned stay put.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsolidationPlan {
    pub entries: Vec<PlannedMemory>,
    /// Memories folded into a survivor, with the tier they were in
    pub absorbed: Vec<(MemoryId, MemoryLayer)>,
}

impl ConsolidationPlan {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.absorbed.is_empty()
    }
}

#[async_trait]
pub trait UpdateAdapter: Adapter {
    /// Plan tier transitions and merges for FoA/DA candidates.
    async fn consolidate(
        &self,
        candidates: Vec<Memory>,
        now: DateTime<Utc>,
    ) -> AdapterResult<ConsolidationPlan>;
}
