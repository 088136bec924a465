use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use super::{read, write, Availability};
use crate::config::VectorNoteConfig;
use crate::embedding::{self, cosine, Embedder, HashingEmbedder};
use crate::error::{AdapterError, AdapterResult, ConfigError};
use crate::model::{Memory, MemoryId};
use crate::traits::{Adapter, NoteInsert, ScoredMemory, VectorNoteAdapter};

const NAME: &str = "vector";

#[derive(Debug, Clone)]
struct Note {
    memory: Memory,
    embedding: Vec<f32>,
}

/// Brute-force cosine index of atomic notes.
///
/// Embeddings are computed before the write lock is taken; the dedup
/// decision, the insert and the symmetric linking happen under one lock.
pub struct InMemoryVectorIndex {
    embedder: Box<dyn Embedder>,
    notes: RwLock<HashMap<MemoryId, Note>>,
    dedup_threshold: f32,
    link_top_k: usize,
    min_link_similarity: f32,
    available: Availability,
}

impl std::fmt::Debug for InMemoryVectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryVectorIndex")
            .field("embedder", &self.embedder.name())
            .field("notes", &read(&self.notes).len())
            .field("dedup_threshold", &self.dedup_threshold)
            .finish()
    }
}

impl InMemoryVectorIndex {
    /// Index with the local hashing embedder and default thresholds.
    pub fn new() -> Self {
        let config = VectorNoteConfig::default();
        Self::with_embedder(&config, Box::new(HashingEmbedder::new(config.dimension)))
    }

    pub fn from_config(config: &VectorNoteConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let embedder = embedding::from_config(config)?;
        Ok(Self::with_embedder(config, embedder))
    }

    pub fn with_embedder(config: &VectorNoteConfig, embedder: Box<dyn Embedder>) -> Self {
        Self {
            embedder,
            notes: RwLock::new(HashMap::new()),
            dedup_threshold: config.dedup_threshold,
            link_top_k: config.link_top_k,
            min_link_similarity: config.min_link_similarity,
            available: Availability::default(),
        }
    }

    /// Toggle liveness. While unavailable every call fails with `NotAvailable`.
    pub fn set_available(&self, available: bool) {
        self.available.set(available);
    }

    pub fn len(&self) -> usize {
        read(&self.notes).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Make every link of `id` point back at it, dropping links to notes that no
/// longer exist.
fn symmetrize(notes: &mut HashMap<MemoryId, Note>, id: &MemoryId) {
    let links: Vec<MemoryId> = match notes.get(id) {
        Some(note) => note.memory.links.iter().cloned().collect(),
        None => return,
    };
    let mut dangling = Vec::new();
    for link in links {
        match notes.get_mut(&link) {
            Some(neighbour) => {
                neighbour.memory.links.insert(id.clone());
            }
            None => dangling.push(link),
        }
    }
    if let Some(note) = notes.get_mut(id) {
        for link in dangling {
            note.memory.links.remove(&link);
        }
    }
}

impl Adapter for InMemoryVectorIndex {
    fn name(&self) -> &str {
        NAME
    }

    fn is_available(&self) -> bool {
        self.available.get()
    }
}

#[async_trait]
impl VectorNoteAdapter for InMemoryVectorIndex {
    async fn insert(&self, memory: Memory) -> AdapterResult<NoteInsert> {
        self.available.ensure(NAME)?;
        memory
            .validate()
            .map_err(|e| AdapterError::invalid_input(NAME, e.to_string()))?;
        let embedding = self.embedder.embed(&memory.enriched_text()).await?;

        let mut notes = write(&self.notes);

        if let Some(existing) = notes.get_mut(&memory.id) {
            let mut memory = memory;
            memory.links.extend(existing.memory.links.iter().cloned());
            *existing = Note {
                memory,
                embedding,
            };
            let id = existing.memory.id.clone();
            symmetrize(&mut notes, &id);
            let stored = notes[&id].memory.clone();
            return Ok(NoteInsert {
                memory: stored,
                deduplicated: false,
                similarity: None,
            });
        }

        let mut scored: Vec<(MemoryId, f32)> = notes
            .iter()
            .map(|(id, note)| (id.clone(), cosine(&embedding, &note.embedding)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        if let Some((best_id, similarity)) = scored.first().cloned() {
            if similarity >= self.dedup_threshold {
                let survivor = notes
                    .get_mut(&best_id)
                    .ok_or_else(|| AdapterError::internal(NAME, "index changed under lock"))?;
                if survivor.memory.merge_from(&memory) {
                    survivor.embedding = embedding;
                }
                survivor.memory.retrieval_count += 1;
                symmetrize(&mut notes, &best_id);
                debug!(
                    survivor = %best_id,
                    absorbed = %memory.id,
                    similarity,
                    "deduplicated note"
                );
                return Ok(NoteInsert {
                    memory: notes[&best_id].memory.clone(),
                    deduplicated: true,
                    similarity: Some(similarity),
                });
            }
        }

        let id = memory.id.clone();
        let mut memory = memory;
        for (neighbour, similarity) in scored.iter().take(self.link_top_k) {
            if *similarity < self.min_link_similarity {
                break;
            }
            memory.links.insert(neighbour.clone());
        }
        memory.links.remove(&id);
        notes.insert(
            id.clone(),
            Note {
                memory,
                embedding,
            },
        );
        symmetrize(&mut notes, &id);

        Ok(NoteInsert {
            memory: notes[&id].memory.clone(),
            deduplicated: false,
            similarity: None,
        })
    }

    async fn update(&self, memory: &Memory) -> AdapterResult<Memory> {
        self.available.ensure(NAME)?;
        memory
            .validate()
            .map_err(|e| AdapterError::invalid_input(NAME, e.to_string()))?;
        if !read(&self.notes).contains_key(&memory.id) {
            return Err(AdapterError::not_found(NAME, memory.id.as_str()));
        }
        let embedding = self.embedder.embed(&memory.enriched_text()).await?;

        let mut notes = write(&self.notes);
        let note = notes
            .get_mut(&memory.id)
            .ok_or_else(|| AdapterError::not_found(NAME, memory.id.as_str()))?;
        let mut updated = memory.clone();
        updated.links.extend(note.memory.links.iter().cloned());
        updated.links.remove(&memory.id);
        updated.retrieval_count = updated.retrieval_count.max(note.memory.retrieval_count);
        *note = Note {
            memory: updated,
            embedding,
        };
        symmetrize(&mut notes, &memory.id);
        Ok(notes[&memory.id].memory.clone())
    }

    async fn delete(&self, id: &MemoryId) -> AdapterResult<bool> {
        self.available.ensure(NAME)?;
        let mut notes = write(&self.notes);
        let Some(removed) = notes.remove(id) else {
            return Ok(false);
        };
        for link in &removed.memory.links {
            if let Some(neighbour) = notes.get_mut(link) {
                neighbour.memory.links.remove(id);
            }
        }
        Ok(true)
    }

    async fn get(&self, id: &MemoryId) -> AdapterResult<Option<Memory>> {
        self.available.ensure(NAME)?;
        Ok(read(&self.notes).get(id).map(|n| n.memory.clone()))
    }

    async fn list(&self) -> AdapterResult<Vec<Memory>> {
        self.available.ensure(NAME)?;
        let mut memories: Vec<Memory> = read(&self.notes)
            .values()
            .map(|n| n.memory.clone())
            .collect();
        memories.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(memories)
    }

    async fn search(&self, query: &str, k: usize) -> AdapterResult<Vec<ScoredMemory>> {
        self.available.ensure(NAME)?;
        if query.trim().is_empty() {
            return Err(AdapterError::invalid_input(NAME, "query must not be empty"));
        }
        let query_embedding = self.embedder.embed(query).await?;

        let notes = read(&self.notes);
        let mut hits: Vec<ScoredMemory> = notes
            .values()
            .filter_map(|note| {
                let score = cosine(&query_embedding, &note.embedding);
                (score > 0.0).then(|| ScoredMemory {
                    memory: note.memory.clone(),
                    score,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.memory.timestamp.cmp(&a.memory.timestamp))
                .then_with(|| a.memory.id.cmp(&b.memory.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn record_retrievals(&self, ids: &[MemoryId]) -> AdapterResult<()> {
        self.available.ensure(NAME)?;
        let mut notes = write(&self.notes);
        for id in ids {
            if let Some(note) = notes.get_mut(id) {
                note.memory.retrieval_count += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MemoryType;

    fn note(content: &str) -> Memory {
        Memory::new(content, MemoryType::Experience)
    }

    #[tokio::test]
    async fn near_duplicates_merge_into_one_note() {
        let index = InMemoryVectorIndex::new();
        let first = index
            .insert(note("User prefers coffee in the morning"))
            .await
            .unwrap();
        assert!(!first.deduplicated);

        for variant in [
            "user prefers coffee in the morning.",
            "User prefers COFFEE in the morning!",
            "User prefers coffee, in the morning",
        ] {
            let out = index.insert(note(variant)).await.unwrap();
            assert!(out.deduplicated);
            assert_eq!(out.memory.id, first.memory.id);
        }

        assert_eq!(index.len(), 1);
        let stored = index.get(&first.memory.id).await.unwrap().unwrap();
        assert_eq!(stored.retrieval_count, 3);
    }

    #[tokio::test]
    async fn related_notes_link_symmetrically() {
        let index = InMemoryVectorIndex::new();
        let a = index
            .insert(note("Espresso coffee brewing tips for the morning"))
            .await
            .unwrap()
            .memory;
        let b = index
            .insert(note("User prefers coffee in the morning"))
            .await
            .unwrap()
            .memory;

        assert!(b.links.contains(&a.id));
        let a = index.get(&a.id).await.unwrap().unwrap();
        assert!(a.links.contains(&b.id));
    }

    #[tokio::test]
    async fn unrelated_notes_are_not_linked() {
        let index = InMemoryVectorIndex::new();
        let a = index.insert(note("zebra")).await.unwrap().memory;
        let b = index.insert(note("quantum")).await.unwrap().memory;
        assert!(a.links.is_empty());
        assert!(!b.links.contains(&a.id));
    }

    #[tokio::test]
    async fn delete_unlinks_neighbours() {
        let index = InMemoryVectorIndex::new();
        let a = index.insert(note("coffee beans roast")).await.unwrap().memory;
        let b = index.insert(note("coffee beans grind")).await.unwrap().memory;
        assert!(b.links.contains(&a.id));

        assert!(index.delete(&b.id).await.unwrap());
        let a = index.get(&a.id).await.unwrap().unwrap();
        assert!(a.links.is_empty());
    }

    #[tokio::test]
    async fn search_returns_most_similar_first() {
        let index = InMemoryVectorIndex::new();
        index.insert(note("Quarterly tax filing deadline")).await.unwrap();
        let coffee = index
            .insert(note("Espresso coffee brewing tips"))
            .await
            .unwrap()
            .memory;

        let hits = index.search("coffee brewing", 5).await.unwrap();
        assert_eq!(hits[0].memory.id, coffee.id);
        assert!(hits.iter().all(|h| h.score > 0.0));
    }

    #[tokio::test]
    async fn update_keeps_links_and_max_retrievals() {
        let index = InMemoryVectorIndex::new();
        let a = index.insert(note("coffee beans roast")).await.unwrap().memory;
        let b = index.insert(note("coffee beans grind")).await.unwrap().memory;
        index.record_retrievals(&[b.id.clone()]).await.unwrap();

        let mut changed = b.clone();
        changed.links.clear();
        changed.retrieval_count = 0;
        changed.tags.push("reflected".into());
        let stored = index.update(&changed).await.unwrap();
        assert!(stored.links.contains(&a.id));
        assert_eq!(stored.retrieval_count, 1);
        assert_eq!(stored.tags, vec!["reflected"]);
    }

    #[tokio::test]
    async fn update_of_missing_note_is_not_found() {
        let index = InMemoryVectorIndex::new();
        let err = index.update(&note("ghost")).await.unwrap_err();
        assert!(matches!(err, AdapterError::NotFound { .. }));
    }
}
