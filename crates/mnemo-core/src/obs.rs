//! Structured observability hooks for memory lifecycle events.
//!
//! This module provides:
//! - Operation-scoped tracing spans for instrumenting engine futures
//! - Emission functions for key lifecycle events: retain, recall, reflect,
//!   eviction, consolidation and cleanup
//!
//! Events are emitted at `info!` level (filter with `RUST_LOG`).

use tracing::info;

use mnemo_adapters::{MemoryId, MemoryLayer};

/// Operation-scoped span, attached to the operation's future with
/// `tracing::Instrument` so it is held across `.await`.
pub fn operation_span(operation: &str, operation_id: &str) -> tracing::Span {
    tracing::info_span!(
        "mnemo.operation",
        operation = %operation,
        operation_id = %operation_id
    )
}

/// Emit event: a memory was retained.
///
/// ```ignore
/// emit_memory_retained(&id, MemoryLayer::Foa, false);
/// // logs: event=memory.retained memory_id=... layer=foa deduplicated=false
/// ```
pub fn emit_memory_retained(id: &MemoryId, layer: MemoryLayer, deduplicated: bool) {
    info!(
        event = "memory.retained",
        memory_id = %id,
        layer = %layer,
        deduplicated = deduplicated,
    );
}

/// Emit event: recall finished.
pub fn emit_recall_completed(results: usize, cache_hit: bool, duration_ms: u64) {
    info!(
        event = "memory.recalled",
        results = results,
        cache_hit = cache_hit,
        duration_ms = duration_ms,
    );
}

/// Emit event: reflection persisted updated and newly created memories.
pub fn emit_reflect_completed(updated: usize, created: usize) {
    info!(event = "memory.reflected", updated = updated, created = created);
}

/// Emit event: a focus-of-attention entry was pushed out of its buffer.
pub fn emit_memory_evicted(id: &MemoryId, session: Option<&str>) {
    info!(
        event = "memory.evicted",
        memory_id = %id,
        session = session.unwrap_or("-"),
    );
}

/// Emit event: a memory changed tier during consolidation.
pub fn emit_memory_moved(id: &MemoryId, from: MemoryLayer, to: MemoryLayer) {
    info!(event = "memory.moved", memory_id = %id, from = %from, to = %to);
}

/// Emit event: consolidation pass completed.
pub fn emit_consolidation_completed(moved: usize, merged: usize, absorbed: usize) {
    info!(
        event = "consolidation.completed",
        moved = moved,
        merged = merged,
        absorbed = absorbed,
    );
}

/// Emit event: cleanup pass completed.
pub fn emit_cleanup_completed(foa: usize, da: usize, notes: usize) {
    info!(
        event = "cleanup.completed",
        foa_removed = foa,
        da_removed = da,
        notes_removed = notes,
    );
}

/// Emit event: a retrieval strategy failed and was skipped (warning level).
pub fn emit_strategy_degraded(strategy: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "retrieval.degraded", strategy = %strategy, error = %error);
}

/// Emit event: a public operation failed (warning level).
pub fn emit_operation_failed(operation: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "operation.failed", operation = %operation, error = %error);
}
