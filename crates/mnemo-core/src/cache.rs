//! Recall result cache with LRU eviction and lazy TTL expiry.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use mnemo_adapters::{text, Context, MemoryType, RetrievalResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::trace;

/// Counters reported through engine metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
}

#[derive(Debug)]
struct Entry {
    results: Vec<RetrievalResult>,
    created_at: Instant,
    /// Logical clock value of the last read or write
    last_accessed: u64,
    access_count: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    clock: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    /// Bumped by every `clear()`
    generation: u64,
}

impl Inner {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

#[derive(Debug)]
pub struct RetrievalCache {
    inner: Mutex<Inner>,
    max_size: usize,
    ttl: Duration,
}

/// SHA-256 hex over the normalized query and everything that scopes a recall.
pub fn cache_key(
    query: &str,
    context: Option<&Context>,
    memory_type: Option<MemoryType>,
    top_k: usize,
) -> String {
    let session = context.and_then(|c| c.session_id.as_deref()).unwrap_or("");
    let user = context.and_then(|c| c.user_id.as_deref()).unwrap_or("");
    let memory_type = memory_type.map(|t| t.to_string()).unwrap_or_default();

    let mut hasher = Sha256::new();
    for part in [
        text::normalize(query).as_str(),
        session,
        user,
        memory_type.as_str(),
        top_k.to_string().as_str(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    hex::encode(hasher.finalize())
}

impl RetrievalCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_size: max_size.max(1),
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached results if present and younger than the TTL. Expired entries
    /// are removed and count as misses.
    pub fn get(&self, key: &str) -> Option<Vec<RetrievalResult>> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let now = inner.tick();
        let fresh = inner
            .entries
            .get(key)
            .map(|e| e.created_at.elapsed() < self.ttl);
        match fresh {
            Some(true) => {
                if let Some(entry) = inner.entries.get_mut(key) {
                    entry.last_accessed = now;
                    entry.access_count += 1;
                    inner.hits += 1;
                    return Some(entry.results.clone());
                }
            }
            Some(false) => {
                inner.entries.remove(key);
                trace!(key, "cache entry expired");
            }
            None => {}
        }
        inner.misses += 1;
        None
    }

    /// Insert or overwrite. Evicts the least recently used entry when the
    /// cache is full.
    pub fn set(&self, key: String, results: Vec<RetrievalResult>) {
        let mut guard = self.lock();
        self.insert(&mut guard, key, results);
    }

    /// Current generation. Read it before computing results that will be
    /// stored with [`RetrievalCache::set_if_current`].
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Like [`RetrievalCache::set`], but the results are dropped when the
    /// cache was cleared after `generation` was read. Returns whether they
    /// were stored.
    pub fn set_if_current(
        &self,
        key: String,
        results: Vec<RetrievalResult>,
        generation: u64,
    ) -> bool {
        let mut guard = self.lock();
        if guard.generation != generation {
            trace!(key = %key, "stale results not cached");
            return false;
        }
        self.insert(&mut guard, key, results);
        true
    }

    fn insert(&self, inner: &mut Inner, key: String, results: Vec<RetrievalResult>) {
        let now = inner.tick();
        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.max_size {
            let lru = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_accessed)
                .map(|(k, _)| k.clone());
            if let Some(lru) = lru {
                inner.entries.remove(&lru);
                inner.evictions += 1;
                trace!(key = %lru, "cache entry evicted");
            }
        }
        inner.entries.insert(
            key,
            Entry {
                results,
                created_at: Instant::now(),
                last_accessed: now,
                access_count: 0,
            },
        );
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.generation += 1;
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads of a live entry since it was stored.
    pub fn access_count(&self, key: &str) -> Option<u64> {
        self.lock().entries.get(key).map(|e| e.access_count)
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            size: inner.entries.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_adapters::{Memory, RetrievalMethod};

    fn results(content: &str) -> Vec<RetrievalResult> {
        vec![RetrievalResult::new(
            Memory::new(content, MemoryType::Semantic),
            1.0,
            RetrievalMethod::Fused,
        )]
    }

    #[test]
    fn test_key_normalizes_query_and_scopes() {
        let ctx = Context::session("s1");
        assert_eq!(
            cache_key("Coffee  Beans", Some(&ctx), None, 5),
            cache_key("coffee beans", Some(&ctx), None, 5)
        );
        assert_ne!(
            cache_key("coffee", Some(&ctx), None, 5),
            cache_key("coffee", Some(&Context::session("s2")), None, 5)
        );
        assert_ne!(
            cache_key("coffee", None, None, 5),
            cache_key("coffee", None, None, 6)
        );
        assert_ne!(
            cache_key("coffee", None, Some(MemoryType::Opinion), 5),
            cache_key("coffee", None, None, 5)
        );
        assert_eq!(cache_key("q", None, None, 1).len(), 64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_then_expire() {
        let cache = RetrievalCache::new(10, Duration::from_secs(60));
        cache.set("k".into(), results("a"));

        assert!(cache.get("k").is_some());
        assert_eq!(cache.access_count("k"), Some(1));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(cache.get("k").is_none());
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                evictions: 0,
                size: 0
            }
        );
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = RetrievalCache::new(2, Duration::from_secs(60));
        cache.set("a".into(), results("a"));
        cache.set("b".into(), results("b"));
        // Touch "a" so "b" becomes the LRU entry.
        assert!(cache.get("a").is_some());
        cache.set("c".into(), results("c"));

        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let cache = RetrievalCache::new(1, Duration::from_secs(60));
        cache.set("a".into(), results("a"));
        cache.set("a".into(), results("a2"));
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.get("a").unwrap()[0].memory.content, "a2");
    }

    #[test]
    fn test_clear() {
        let cache = RetrievalCache::new(4, Duration::from_secs(60));
        cache.set("a".into(), results("a"));
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn test_results_computed_before_clear_are_not_cached() {
        let cache = RetrievalCache::new(4, Duration::from_secs(60));
        let before = cache.generation();
        cache.clear();
        assert!(!cache.set_if_current("a".into(), results("stale"), before));
        assert!(cache.get("a").is_none());

        let now = cache.generation();
        assert!(cache.set_if_current("a".into(), results("fresh"), now));
        assert_eq!(cache.get("a").unwrap()[0].memory.content, "fresh");
    }
}
