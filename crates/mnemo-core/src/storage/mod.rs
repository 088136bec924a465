//! Tiered memory lifecycle
//!
//! - FoA: bounded per-session buffers held in process
//! - DA: the storage adapter, with a TTL
//! - LTM: the graph adapter, never evicted
//!
//! The vector index holds the canonical copy of every memory, including its
//! current tier and retrieval count.

pub mod consolidation;
pub mod foa;
pub mod manager;

use mnemo_adapters::{MemoryId, MemoryLayer};
use serde::{Deserialize, Serialize};

pub use consolidation::ConsolidationJob;
pub use foa::{FoaBuffer, FoaLimits};
pub use manager::StorageManager;

/// What a cleanup pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub foa_removed: Vec<MemoryId>,
    pub da_removed: Vec<MemoryId>,
    /// Non-LTM notes dropped from the vector index
    pub notes_removed: Vec<MemoryId>,
}

impl CleanupReport {
    pub fn removed_count(&self) -> usize {
        self.foa_removed.len() + self.da_removed.len() + self.notes_removed.len()
    }
}

/// A tier transition applied by consolidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierMove {
    pub id: MemoryId,
    pub from: MemoryLayer,
    pub to: MemoryLayer,
}

/// What a consolidation pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationReport {
    pub moved: Vec<TierMove>,
    /// Survivors that absorbed duplicates without changing tier
    pub merged: Vec<MemoryId>,
    /// Duplicates folded into a survivor and deleted
    pub absorbed: Vec<MemoryId>,
}

impl ConsolidationReport {
    pub fn is_empty(&self) -> bool {
        self.moved.is_empty() && self.merged.is_empty() && self.absorbed.is_empty()
    }
}

/// Number of memories per tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    pub foa: usize,
    pub da: usize,
    pub ltm: usize,
    /// Notes in the vector index, any tier
    pub notes: usize,
}
