//! Process-local adapter implementations
//!
//! Provides `InMemoryStorage`, `InMemoryGraph` and `InMemoryVectorIndex`.
//! They satisfy the adapter contracts without any external service and are
//! the default backends. Each carries an availability switch so failure
//! handling can be exercised deterministically.

mod graph;
mod storage;
mod vector;

pub use graph::InMemoryGraph;
pub use storage::InMemoryStorage;
pub use vector::InMemoryVectorIndex;

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub(crate) use crate::traits::Availability;

// A panic while holding one of these locks leaves plain data behind, never a
// half-applied invariant, so poisoning is ignored.

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(PoisonError::into_inner)
}
