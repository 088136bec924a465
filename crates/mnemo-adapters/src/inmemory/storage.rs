use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{lock, Availability};
use crate::error::{AdapterError, AdapterResult};
use crate::model::{Memory, MemoryId};
use crate::traits::{Adapter, StorageAdapter};

const NAME: &str = "storage";

#[derive(Debug)]
struct Entry {
    memory: Memory,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        !matches!(self.expires_at, Some(at) if now >= at)
    }
}

/// In-memory DA storage backed by a `HashMap<MemoryId, Entry>`.
///
/// Expired entries are dropped lazily on the next access.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    entries: Mutex<HashMap<MemoryId, Entry>>,
    available: Availability,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle liveness. While unavailable every call fails with `NotAvailable`.
    pub fn set_available(&self, available: bool) {
        self.available.set(available);
    }

    /// Number of stored entries, expired ones included.
    pub fn raw_len(&self) -> usize {
        lock(&self.entries).len()
    }
}

impl Adapter for InMemoryStorage {
    fn name(&self) -> &str {
        NAME
    }

    fn is_available(&self) -> bool {
        self.available.get()
    }
}

#[async_trait]
impl StorageAdapter for InMemoryStorage {
    async fn put(&self, memory: &Memory, ttl: Option<Duration>) -> AdapterResult<()> {
        self.available.ensure(NAME)?;
        memory
            .validate()
            .map_err(|e| AdapterError::invalid_input(NAME, e.to_string()))?;
        let entry = Entry {
            memory: memory.clone(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        lock(&self.entries).insert(memory.id.clone(), entry);
        Ok(())
    }

    async fn get(&self, id: &MemoryId) -> AdapterResult<Option<Memory>> {
        self.available.ensure(NAME)?;
        let now = Instant::now();
        let mut entries = lock(&self.entries);
        match entries.get(id) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.memory.clone())),
            Some(_) => {
                entries.remove(id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, id: &MemoryId) -> AdapterResult<bool> {
        self.available.ensure(NAME)?;
        let now = Instant::now();
        Ok(lock(&self.entries)
            .remove(id)
            .is_some_and(|entry| entry.is_live(now)))
    }

    async fn list(&self) -> AdapterResult<Vec<Memory>> {
        self.available.ensure(NAME)?;
        let now = Instant::now();
        let mut entries = lock(&self.entries);
        entries.retain(|_, entry| entry.is_live(now));
        let mut memories: Vec<Memory> = entries.values().map(|e| e.memory.clone()).collect();
        memories.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(memories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MemoryLayer, MemoryType};

    fn da(content: &str) -> Memory {
        Memory::new(content, MemoryType::Episodic).with_layer(MemoryLayer::Da)
    }

    #[tokio::test]
    async fn put_get_delete() {
        let storage = InMemoryStorage::new();
        let m = da("walked the dog");
        storage.put(&m, None).await.unwrap();
        assert_eq!(storage.get(&m.id).await.unwrap(), Some(m.clone()));
        assert!(storage.delete(&m.id).await.unwrap());
        assert!(!storage.delete(&m.id).await.unwrap());
        assert_eq!(storage.get(&m.id).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expiry_hides_entry() {
        let storage = InMemoryStorage::new();
        let m = da("expires soon");
        storage.put(&m, Some(Duration::from_secs(10))).await.unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(storage.get(&m.id).await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(storage.get(&m.id).await.unwrap().is_none());
        assert!(storage.list().await.unwrap().is_empty());
        assert_eq!(storage.raw_len(), 0);
    }

    #[tokio::test]
    async fn unavailable_storage_fails_fast() {
        let storage = InMemoryStorage::new();
        storage.set_available(false);
        let err = storage.put(&da("x"), None).await.unwrap_err();
        assert!(err.is_not_available());
        assert!(!storage.is_available());
    }

    #[tokio::test]
    async fn invalid_memory_is_rejected() {
        let storage = InMemoryStorage::new();
        let err = storage.put(&da("  "), None).await.unwrap_err();
        assert!(matches!(err, AdapterError::InvalidInput { .. }));
    }
}
