//! StorageManager: places memories in their tier and moves them between tiers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mnemo_adapters::{
    text, AdapterError, AdapterResult, GraphAdapter, Memory, MemoryId, MemoryLayer, Relation,
    RetrievalMethod, RetrievalResult, StorageAdapter, UpdateAdapter, VectorNoteAdapter,
};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use super::foa::{FoaBuffer, FoaLimits};
use super::{CleanupReport, ConsolidationReport, TierCounts, TierMove};
use crate::adapters::GuardedAdapters;
use crate::config::TierConfig;
use crate::obs;
use crate::resilience::Guarded;
use crate::retrieval::fusion::sort_ranked;

const NAME: &str = "storage_manager";

/// Relation type linking two entities mentioned by the same LTM memory
pub const CO_MENTION_RELATION: &str = "related_to";
const CO_MENTION_STRENGTH: f32 = 0.5;

/// LTM hits are a filtered view of the vector index, so over-fetch.
const LTM_OVERFETCH: usize = 4;

type SessionKey = Option<String>;

pub struct StorageManager {
    storage: Arc<Guarded<dyn StorageAdapter>>,
    graph: Arc<Guarded<dyn GraphAdapter>>,
    vector: Arc<Guarded<dyn VectorNoteAdapter>>,
    foa: Mutex<HashMap<SessionKey, FoaBuffer>>,
    limits: FoaLimits,
    da_ttl: Duration,
}

/// Score candidates by lexical overlap with the query, best first.
pub(crate) fn rank_lexical(
    query: &str,
    candidates: impl IntoIterator<Item = Memory>,
    top_k: usize,
) -> Vec<RetrievalResult> {
    let query_tokens = text::content_tokens(query);
    let mut hits: Vec<RetrievalResult> = candidates
        .into_iter()
        .filter_map(|m| {
            let score = text::overlap_score(&query_tokens, &m.lexical_terms());
            (score > 0.0).then(|| RetrievalResult::new(m, score, RetrievalMethod::Keyword))
        })
        .collect();
    sort_ranked(&mut hits);
    hits.truncate(top_k);
    hits
}

fn invalid(err: impl std::fmt::Display) -> AdapterError {
    AdapterError::invalid_input(NAME, err.to_string())
}

impl StorageManager {
    pub fn new(adapters: &GuardedAdapters, tiers: &TierConfig) -> Self {
        Self {
            storage: Arc::clone(&adapters.storage),
            graph: Arc::clone(&adapters.graph),
            vector: Arc::clone(&adapters.vector),
            foa: Mutex::new(HashMap::new()),
            limits: FoaLimits {
                max_tokens: tiers.foa_max_tokens,
                max_memories: tiers.foa_max_memories,
                max_age: tiers.foa_max_age(),
            },
            da_ttl: tiers.da_ttl(),
        }
    }

    /// Fails with `NotAvailable` when the storage backend is down.
    pub fn ensure_available(&self) -> AdapterResult<()> {
        if self.storage.inner().is_available() {
            Ok(())
        } else {
            Err(AdapterError::not_available(self.storage.name()))
        }
    }

    // -----------------------------------------------------------------------
    // Adapter shorthands
    // -----------------------------------------------------------------------

    async fn note(&self, id: &MemoryId) -> AdapterResult<Option<Memory>> {
        self.vector
            .call("get", move |v| async move { v.get(id).await })
            .await
    }

    async fn drop_note(&self, id: &MemoryId) -> AdapterResult<bool> {
        self.vector
            .call("delete", move |v| async move { v.delete(id).await })
            .await
    }

    async fn notes(&self) -> AdapterResult<Vec<Memory>> {
        self.vector
            .call("list", |v| async move { v.list().await })
            .await
    }

    async fn da_list(&self) -> AdapterResult<Vec<Memory>> {
        self.storage
            .call("list", |s| async move { s.list().await })
            .await
    }

    /// Write the memory into the vector index: update in place, or insert
    /// when the index has never seen it. An insert may fold it into an
    /// existing near-duplicate, in which case the survivor is returned.
    async fn index_note(&self, memory: &Memory) -> AdapterResult<Memory> {
        let updated = self
            .vector
            .call("update", move |v| async move { v.update(memory).await })
            .await;
        match updated {
            Ok(stored) => Ok(stored),
            Err(AdapterError::NotFound { .. }) => {
                let inserted = self
                    .vector
                    .call("insert", |v| {
                        let memory = memory.clone();
                        async move { v.insert(memory).await }
                    })
                    .await?;
                Ok(inserted.memory)
            }
            Err(err) => Err(err),
        }
    }

    // -----------------------------------------------------------------------
    // Tier placement
    // -----------------------------------------------------------------------

    async fn place(&self, memory: Memory) -> AdapterResult<()> {
        match memory.layer {
            MemoryLayer::Foa => {
                self.place_foa(memory).await;
                Ok(())
            }
            MemoryLayer::Da => {
                let ttl = self.da_ttl;
                let memory = &memory;
                self.storage
                    .call("put", move |s| async move { s.put(memory, Some(ttl)).await })
                    .await
            }
            MemoryLayer::Ltm => self.persist_ltm(&memory).await,
        }
    }

    async fn place_foa(&self, memory: Memory) {
        let key = memory.session_id.clone();
        let evicted = {
            let mut buffers = self.foa.lock().await;
            for (session, buffer) in buffers.iter_mut() {
                if session != &key {
                    buffer.remove(&memory.id);
                }
            }
            let buffer = buffers.entry(key).or_default();
            if buffer.replace(memory.clone()) {
                Vec::new()
            } else {
                buffer.push(memory, &self.limits, Utc::now())
            }
        };

        for gone in evicted {
            obs::emit_memory_evicted(&gone.id, gone.session_id.as_deref());
            if let Err(err) = self.drop_note(&gone.id).await {
                warn!(memory_id = %gone.id, error = %err, "evicted memory left in vector index");
            }
        }
    }

    /// Memory node, its entities, and a `related_to` edge for every pair of
    /// entities it mentions.
    async fn persist_ltm(&self, memory: &Memory) -> AdapterResult<()> {
        self.graph
            .call("upsert_memory", move |g| async move { g.upsert_memory(memory).await })
            .await?;

        let ids: Vec<&str> = memory.entities.iter().map(|e| e.id.as_str()).collect();
        for (idx, source) in ids.iter().enumerate() {
            for target in &ids[idx + 1..] {
                if source == target {
                    continue;
                }
                let relation =
                    Relation::new(*source, *target, CO_MENTION_RELATION, CO_MENTION_STRENGTH)
                        .map_err(invalid)?;
                let relation = &relation;
                self.graph
                    .call("upsert_relation", move |g| async move {
                        g.upsert_relation(relation).await
                    })
                    .await?;
            }
        }
        Ok(())
    }

    async fn remove_from_foa(&self, id: &MemoryId) -> Option<Memory> {
        let mut buffers = self.foa.lock().await;
        let removed = buffers.values_mut().find_map(|b| b.remove(id));
        buffers.retain(|_, b| !b.is_empty());
        removed
    }

    async fn remove_from_tier(&self, id: &MemoryId, layer: MemoryLayer) -> AdapterResult<bool> {
        match layer {
            MemoryLayer::Foa => Ok(self.remove_from_foa(id).await.is_some()),
            MemoryLayer::Da => {
                self.storage
                    .call("delete", move |s| async move { s.delete(id).await })
                    .await
            }
            MemoryLayer::Ltm => {
                self.graph
                    .call("delete_memory", move |g| async move { g.delete_memory(id).await })
                    .await
            }
        }
    }

    // -----------------------------------------------------------------------
    // Public contract
    // -----------------------------------------------------------------------

    /// Index the memory and store it in the tier named by `memory.layer`.
    ///
    /// Returns the stored memory. If the index folded it into an existing
    /// near-duplicate, that survivor is returned (and re-placed) instead.
    #[instrument(skip(self, memory), fields(memory_id = %memory.id, layer = %memory.layer))]
    pub async fn add_memory(&self, memory: Memory) -> AdapterResult<Memory> {
        self.ensure_available()?;
        memory.validate().map_err(invalid)?;

        let stored = self.index_note(&memory).await?;
        if stored.id != memory.id {
            debug!(survivor = %stored.id, "memory folded into existing note");
            return self.update_memory(stored).await;
        }
        self.place(stored.clone()).await?;
        Ok(stored)
    }

    /// Replace a known memory, moving it when its `layer` changed.
    ///
    /// Fails with `NotFound` when the memory is not indexed: a deleted or
    /// evicted memory is never brought back by an update.
    #[instrument(skip(self, memory), fields(memory_id = %memory.id, layer = %memory.layer))]
    pub async fn update_memory(&self, memory: Memory) -> AdapterResult<Memory> {
        self.ensure_available()?;
        memory.validate().map_err(invalid)?;

        let previous = match self.note(&memory.id).await? {
            Some(current) => current.layer,
            None => return Err(AdapterError::not_found(NAME, memory.id.to_string())),
        };
        let stored = {
            let memory = &memory;
            self.vector
                .call("update", move |v| async move { v.update(memory).await })
                .await?
        };
        if previous != stored.layer {
            self.remove_from_tier(&stored.id, previous).await?;
        }
        self.place(stored.clone()).await?;
        Ok(stored)
    }

    /// Canonical copy from the vector index.
    pub async fn get_memory(&self, id: &MemoryId) -> AdapterResult<Option<Memory>> {
        self.ensure_available()?;
        self.note(id).await
    }

    /// Remove a memory from its tier and from the index.
    #[instrument(skip(self))]
    pub async fn delete_memory(&self, id: &MemoryId) -> AdapterResult<bool> {
        self.ensure_available()?;
        let removed = match self.note(id).await?.map(|m| m.layer) {
            Some(layer) => self.remove_from_tier(id, layer).await?,
            None => self.remove_from_foa(id).await.is_some(),
        };
        let dropped = self.drop_note(id).await?;
        Ok(removed || dropped)
    }

    /// Lexical search over FoA. With a session only that session's buffer is
    /// searched.
    pub async fn search_foa(
        &self,
        query: &str,
        top_k: usize,
        session: Option<&str>,
    ) -> AdapterResult<Vec<RetrievalResult>> {
        self.ensure_available()?;
        let candidates: Vec<Memory> = {
            let buffers = self.foa.lock().await;
            match session {
                Some(s) => buffers
                    .get(&Some(s.to_string()))
                    .map(|b| b.iter().cloned().collect())
                    .unwrap_or_default(),
                None => buffers.values().flat_map(|b| b.iter().cloned()).collect(),
            }
        };
        Ok(rank_lexical(query, candidates, top_k))
    }

    /// Lexical search over DA.
    pub async fn search_da(&self, query: &str, top_k: usize) -> AdapterResult<Vec<RetrievalResult>> {
        self.ensure_available()?;
        let candidates = self.da_list().await?;
        Ok(rank_lexical(query, candidates, top_k))
    }

    /// Similarity search restricted to long-term memories.
    pub async fn search_ltm(&self, query: &str, top_k: usize) -> AdapterResult<Vec<RetrievalResult>> {
        self.ensure_available()?;
        let k = top_k.saturating_mul(LTM_OVERFETCH);
        let hits = self
            .vector
            .call("search", move |v| async move { v.search(query, k).await })
            .await?;
        Ok(hits
            .into_iter()
            .filter(|h| h.memory.layer == MemoryLayer::Ltm)
            .take(top_k)
            .map(|h| RetrievalResult::new(h.memory, f64::from(h.score), RetrievalMethod::Semantic))
            .collect())
    }

    pub async fn record_retrievals(&self, ids: &[MemoryId]) -> AdapterResult<()> {
        self.ensure_available()?;
        if ids.is_empty() {
            return Ok(());
        }
        self.vector
            .call("record_retrievals", move |v| async move { v.record_retrievals(ids).await })
            .await
    }

    pub async fn tier_counts(&self) -> AdapterResult<TierCounts> {
        self.ensure_available()?;
        let foa = self.foa.lock().await.values().map(FoaBuffer::len).sum();
        let da = self.da_list().await?.len();
        let notes = self.notes().await?;
        Ok(TierCounts {
            foa,
            da,
            ltm: notes.iter().filter(|m| m.layer == MemoryLayer::Ltm).count(),
            notes: notes.len(),
        })
    }

    /// Remove FoA and DA memories older than `max_age`, and non-LTM notes of
    /// the same age from the index. LTM is never touched.
    #[instrument(skip(self))]
    pub async fn cleanup(&self, max_age: Duration) -> AdapterResult<CleanupReport> {
        self.ensure_available()?;
        let now = Utc::now();
        let max_age_chrono = chrono::Duration::from_std(max_age).map_err(invalid)?;
        let cutoff = now - max_age_chrono;
        let mut report = CleanupReport::default();

        // Phase 1: FoA buffers
        {
            let mut buffers = self.foa.lock().await;
            for buffer in buffers.values_mut() {
                report
                    .foa_removed
                    .extend(buffer.purge_older_than(max_age, now).into_iter().map(|m| m.id));
            }
            buffers.retain(|_, b| !b.is_empty());
        }

        // Phase 2: DA records
        for memory in self.da_list().await? {
            if memory.timestamp < cutoff {
                let id = &memory.id;
                if self
                    .storage
                    .call("delete", move |s| async move { s.delete(id).await })
                    .await?
                {
                    report.da_removed.push(memory.id);
                }
            }
        }

        // Phase 3: stale non-LTM notes
        for note in self.notes().await? {
            if note.layer == MemoryLayer::Ltm || note.timestamp >= cutoff {
                continue;
            }
            if self.drop_note(&note.id).await? {
                report.notes_removed.push(note.id);
            }
        }

        obs::emit_cleanup_completed(
            report.foa_removed.len(),
            report.da_removed.len(),
            report.notes_removed.len(),
        );
        Ok(report)
    }

    /// One consolidation pass: plan with the update adapter over every FoA
    /// and DA memory, then apply the plan.
    #[instrument(skip(self, update))]
    pub async fn consolidate(
        &self,
        update: &Guarded<dyn UpdateAdapter>,
    ) -> AdapterResult<ConsolidationReport> {
        self.ensure_available()?;
        let now = Utc::now();

        let mut candidates: Vec<Memory> = {
            let buffers = self.foa.lock().await;
            buffers.values().flat_map(|b| b.iter().cloned()).collect()
        };
        candidates.extend(self.da_list().await?);
        if candidates.is_empty() {
            return Ok(ConsolidationReport::default());
        }

        let canonical: HashMap<MemoryId, Memory> = self
            .notes()
            .await?
            .into_iter()
            .map(|m| (m.id.clone(), m))
            .collect();
        for candidate in &mut candidates {
            if let Some(note) = canonical.get(&candidate.id) {
                candidate.retrieval_count = note.retrieval_count;
                candidate.links = note.links.clone();
            }
        }

        let plan = update
            .call("consolidate", |u| {
                let candidates = candidates.clone();
                async move { u.consolidate(candidates, now).await }
            })
            .await?;

        let mut report = ConsolidationReport::default();
        for entry in plan.entries {
            let from = entry.previous_layer;
            let to = entry.memory.layer;
            let id = entry.memory.id.clone();
            match self.update_memory(entry.memory).await {
                Ok(_) => {}
                // Deleted after the snapshot was taken.
                Err(AdapterError::NotFound { .. }) => {
                    debug!(memory_id = %id, "skipping memory removed during consolidation");
                    continue;
                }
                Err(err) => return Err(err),
            }
            if from != to {
                obs::emit_memory_moved(&id, from, to);
                report.moved.push(TierMove { id, from, to });
            } else {
                report.merged.push(id);
            }
        }
        for (id, _) in plan.absorbed {
            self.delete_memory(&id).await?;
            report.absorbed.push(id);
        }

        obs::emit_consolidation_completed(
            report.moved.len(),
            report.merged.len(),
            report.absorbed.len(),
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::Adapters;
    use crate::resilience::GuardPolicy;
    use mnemo_adapters::{KeywordAnalyzer, MemoryType};

    fn manager() -> (StorageManager, GuardedAdapters) {
        let adapters = Adapters::in_memory(Arc::new(KeywordAnalyzer::new())).unwrap();
        let guarded = GuardedAdapters::new(adapters, &GuardPolicy::default());
        let tiers = TierConfig {
            foa_max_memories: 2,
            ..TierConfig::default()
        };
        (StorageManager::new(&guarded, &tiers), guarded)
    }

    #[tokio::test]
    async fn test_add_places_in_layer() {
        let (mgr, _) = manager();
        let foa = mgr
            .add_memory(Memory::new("zebra stripes", MemoryType::Semantic).with_session("s1"))
            .await
            .unwrap();
        let da = mgr
            .add_memory(
                Memory::new("quantum tunnels", MemoryType::Semantic).with_layer(MemoryLayer::Da),
            )
            .await
            .unwrap();

        let counts = mgr.tier_counts().await.unwrap();
        assert_eq!((counts.foa, counts.da, counts.ltm, counts.notes), (1, 1, 0, 2));
        assert_eq!(mgr.search_foa("zebra", 5, Some("s1")).await.unwrap()[0].memory.id, foa.id);
        assert!(mgr.search_foa("zebra", 5, Some("other")).await.unwrap().is_empty());
        assert_eq!(mgr.search_da("quantum", 5).await.unwrap()[0].memory.id, da.id);
    }

    #[tokio::test]
    async fn test_foa_eviction_drops_note() {
        let (mgr, _) = manager();
        let first = mgr
            .add_memory(Memory::new("alpha apples", MemoryType::Episodic))
            .await
            .unwrap();
        mgr.add_memory(Memory::new("bravo bananas", MemoryType::Episodic))
            .await
            .unwrap();
        mgr.add_memory(Memory::new("charlie cherries", MemoryType::Episodic))
            .await
            .unwrap();

        assert!(mgr.get_memory(&first.id).await.unwrap().is_none());
        assert_eq!(mgr.tier_counts().await.unwrap().foa, 2);
    }

    #[tokio::test]
    async fn test_update_moves_between_tiers() {
        let (mgr, adapters) = manager();
        let mut m = mgr
            .add_memory(Memory::new("Alice met Bob in Paris", MemoryType::Episodic))
            .await
            .unwrap();
        m.layer = MemoryLayer::Ltm;
        m.entities = vec![
            mnemo_adapters::EntityRef::new("Alice", "name"),
            mnemo_adapters::EntityRef::new("Bob", "name"),
        ];
        mgr.update_memory(m.clone()).await.unwrap();

        let counts = mgr.tier_counts().await.unwrap();
        assert_eq!((counts.foa, counts.ltm), (0, 1));
        let graph = adapters.graph.inner();
        assert!(graph.get_memory(&m.id).await.unwrap().is_some());
        assert_eq!(graph.relations("name:alice").await.unwrap().len(), 1);
        assert_eq!(mgr.search_ltm("alice paris", 3).await.unwrap()[0].memory.id, m.id);
    }

    #[tokio::test]
    async fn test_delete_removes_everywhere() {
        let (mgr, _) = manager();
        let m = mgr
            .add_memory(Memory::new("temporary", MemoryType::Episodic).with_layer(MemoryLayer::Da))
            .await
            .unwrap();
        assert!(mgr.delete_memory(&m.id).await.unwrap());
        assert!(!mgr.delete_memory(&m.id).await.unwrap());
        assert_eq!(mgr.tier_counts().await.unwrap(), TierCounts::default());
    }

    #[tokio::test]
    async fn test_update_does_not_resurrect_deleted_memory() {
        let (mgr, _) = manager();
        let m = mgr
            .add_memory(Memory::new("old door code", MemoryType::Episodic))
            .await
            .unwrap();
        mgr.delete_memory(&m.id).await.unwrap();

        let err = mgr.update_memory(m.clone()).await.unwrap_err();
        assert!(matches!(err, AdapterError::NotFound { .. }));
        assert!(mgr.get_memory(&m.id).await.unwrap().is_none());
        assert_eq!(mgr.tier_counts().await.unwrap(), TierCounts::default());
    }

    #[tokio::test]
    async fn test_consolidation_skips_memory_deleted_after_snapshot() {
        let (mgr, adapters) = manager();
        let mut m = Memory::new("stale standup notes", MemoryType::Episodic);
        m.timestamp = Utc::now() - chrono::Duration::minutes(30);
        let m = mgr.add_memory(m).await.unwrap();
        // The FoA buffer still holds it, the index no longer does.
        adapters.vector.inner().delete(&m.id).await.unwrap();

        let report = mgr.consolidate(&adapters.update).await.unwrap();
        assert!(report.moved.is_empty());
        assert!(mgr.get_memory(&m.id).await.unwrap().is_none());
        assert_eq!(mgr.tier_counts().await.unwrap().da, 0);
    }

    #[tokio::test]
    async fn test_unavailable_storage_fails_fast() {
        let storage = Arc::new(mnemo_adapters::InMemoryStorage::new());
        let mut adapters = Adapters::in_memory(Arc::new(KeywordAnalyzer::new())).unwrap();
        let shared: Arc<dyn StorageAdapter> = storage.clone();
        adapters.storage = shared;
        let guarded = GuardedAdapters::new(adapters, &GuardPolicy::default());
        let mgr = StorageManager::new(&guarded, &TierConfig::default());
        storage.set_available(false);

        let err = mgr.search_foa("x", 1, None).await.unwrap_err();
        assert!(err.is_not_available());
        let err = mgr
            .add_memory(Memory::new("x", MemoryType::Episodic))
            .await
            .unwrap_err();
        assert!(err.is_not_available());
    }

    #[tokio::test]
    async fn test_rejects_invalid_memory() {
        let (mgr, _) = manager();
        let err = mgr
            .add_memory(Memory::new("  ", MemoryType::Episodic))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::InvalidInput { .. }));
    }
}
