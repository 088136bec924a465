//! Retrieval strategies. Each produces its own ranked list for fusion.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use mnemo_adapters::{
    AdapterResult, Context, GraphAdapter, Memory, MemoryId, MemoryType, RetrievalMethod,
    RetrievalResult, VectorNoteAdapter,
};

use super::fusion::sort_ranked;
use crate::resilience::Guarded;
use crate::storage::StorageManager;

/// Score multiplier for memories reached over one `links` hop.
pub const SUBGRAPH_DECAY: f64 = 0.5;

/// One recall request as seen by a strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalQuery {
    pub text: String,
    pub context: Option<Context>,
    pub memory_type: Option<MemoryType>,
    /// Candidates a strategy should return at most
    pub limit: usize,
}

impl RetrievalQuery {
    pub fn session(&self) -> Option<&str> {
        self.context.as_ref().and_then(|c| c.session_id.as_deref())
    }
}

#[async_trait]
pub trait RetrievalStrategy: Send + Sync {
    fn method(&self) -> RetrievalMethod;

    /// Ranked hits, best first.
    async fn retrieve(&self, query: &RetrievalQuery) -> AdapterResult<Vec<RetrievalResult>>;
}

/// Keep the best score per memory, then rank.
fn collect_best(
    scored: HashMap<MemoryId, (Memory, f64)>,
    method: RetrievalMethod,
    limit: usize,
) -> Vec<RetrievalResult> {
    let mut hits: Vec<RetrievalResult> = scored
        .into_values()
        .map(|(memory, score)| RetrievalResult::new(memory, score, method))
        .collect();
    sort_ranked(&mut hits);
    hits.truncate(limit);
    hits
}

fn keep_best(scored: &mut HashMap<MemoryId, (Memory, f64)>, memory: Memory, score: f64) {
    match scored.get_mut(&memory.id) {
        Some(slot) if slot.1 >= score => {}
        Some(slot) => slot.1 = score,
        None => {
            scored.insert(memory.id.clone(), (memory, score));
        }
    }
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

/// Entity match, then memories mentioning the entity, then memories of
/// entities one relation away weighted by relation strength.
pub struct GraphStrategy {
    graph: Arc<Guarded<dyn GraphAdapter>>,
}

impl GraphStrategy {
    pub fn new(graph: Arc<Guarded<dyn GraphAdapter>>) -> Self {
        Self { graph }
    }

    async fn mentioning(&self, entity_id: &str) -> AdapterResult<Vec<Memory>> {
        self.graph
            .call("memories_for_entity", move |g| async move {
                g.memories_for_entity(entity_id).await
            })
            .await
    }
}

#[async_trait]
impl RetrievalStrategy for GraphStrategy {
    fn method(&self) -> RetrievalMethod {
        RetrievalMethod::Graph
    }

    async fn retrieve(&self, query: &RetrievalQuery) -> AdapterResult<Vec<RetrievalResult>> {
        let text = query.text.as_str();
        let limit = query.limit;
        let matches = self
            .graph
            .call("find_entities", move |g| async move { g.find_entities(text, limit).await })
            .await?;

        let mut scored = HashMap::new();
        for matched in &matches {
            let entity_id = matched.entity.id.as_str();
            for memory in self.mentioning(entity_id).await? {
                keep_best(&mut scored, memory, matched.score);
            }

            let relations = self
                .graph
                .call("relations", move |g| async move { g.relations(entity_id).await })
                .await?;
            for relation in relations {
                let Some(neighbour) = relation.other_end(entity_id) else {
                    continue;
                };
                let weight = matched.score * f64::from(relation.strength);
                for memory in self.mentioning(neighbour).await? {
                    keep_best(&mut scored, memory, weight);
                }
            }
        }
        Ok(collect_best(scored, RetrievalMethod::Graph, query.limit))
    }
}

// ---------------------------------------------------------------------------
// Semantic
// ---------------------------------------------------------------------------

/// k-nearest notes in the vector index.
pub struct SemanticStrategy {
    vector: Arc<Guarded<dyn VectorNoteAdapter>>,
}

impl SemanticStrategy {
    pub fn new(vector: Arc<Guarded<dyn VectorNoteAdapter>>) -> Self {
        Self { vector }
    }
}

#[async_trait]
impl RetrievalStrategy for SemanticStrategy {
    fn method(&self) -> RetrievalMethod {
        RetrievalMethod::Semantic
    }

    async fn retrieve(&self, query: &RetrievalQuery) -> AdapterResult<Vec<RetrievalResult>> {
        let text = query.text.as_str();
        let limit = query.limit;
        let hits = self
            .vector
            .call("search", move |v| async move { v.search(text, limit).await })
            .await?;
        Ok(hits
            .into_iter()
            .map(|h| RetrievalResult::new(h.memory, f64::from(h.score), RetrievalMethod::Semantic))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Subgraph
// ---------------------------------------------------------------------------

/// One hop along `links` from the semantic seed set. Only memories that are
/// not seeds themselves are returned.
pub struct SubgraphStrategy {
    vector: Arc<Guarded<dyn VectorNoteAdapter>>,
}

impl SubgraphStrategy {
    pub fn new(vector: Arc<Guarded<dyn VectorNoteAdapter>>) -> Self {
        Self { vector }
    }
}

#[async_trait]
impl RetrievalStrategy for SubgraphStrategy {
    fn method(&self) -> RetrievalMethod {
        RetrievalMethod::Subgraph
    }

    async fn retrieve(&self, query: &RetrievalQuery) -> AdapterResult<Vec<RetrievalResult>> {
        let text = query.text.as_str();
        let limit = query.limit;
        let seeds = self
            .vector
            .call("search", move |v| async move { v.search(text, limit).await })
            .await?;
        let seed_ids: HashSet<&MemoryId> = seeds.iter().map(|s| &s.memory.id).collect();

        let mut scored: HashMap<MemoryId, (Memory, f64)> = HashMap::new();
        for seed in &seeds {
            let weight = f64::from(seed.score) * SUBGRAPH_DECAY;
            for link in &seed.memory.links {
                if seed_ids.contains(link) {
                    continue;
                }
                if scored.get(link).is_some_and(|(_, best)| *best >= weight) {
                    continue;
                }
                let neighbour = self
                    .vector
                    .call("get", move |v| async move { v.get(link).await })
                    .await?;
                if let Some(memory) = neighbour {
                    keep_best(&mut scored, memory, weight);
                }
            }
        }
        Ok(collect_best(scored, RetrievalMethod::Subgraph, query.limit))
    }
}

// ---------------------------------------------------------------------------
// Keyword
// ---------------------------------------------------------------------------

/// Lexical match over the FoA and DA tiers. FoA is limited to the caller's
/// session when the context names one.
pub struct KeywordStrategy {
    storage: Arc<StorageManager>,
}

impl KeywordStrategy {
    pub fn new(storage: Arc<StorageManager>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl RetrievalStrategy for KeywordStrategy {
    fn method(&self) -> RetrievalMethod {
        RetrievalMethod::Keyword
    }

    async fn retrieve(&self, query: &RetrievalQuery) -> AdapterResult<Vec<RetrievalResult>> {
        let foa = self
            .storage
            .search_foa(&query.text, query.limit, query.session())
            .await?;
        let da = self.storage.search_da(&query.text, query.limit).await?;

        let mut scored = HashMap::new();
        for hit in foa.into_iter().chain(da) {
            keep_best(&mut scored, hit.memory, hit.score);
        }
        Ok(collect_best(scored, RetrievalMethod::Keyword, query.limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::GuardPolicy;
    use mnemo_adapters::{
        EntityRef, InMemoryGraph, InMemoryVectorIndex, MemoryLayer, Relation,
    };

    fn query(text: &str) -> RetrievalQuery {
        RetrievalQuery {
            text: text.into(),
            context: None,
            memory_type: None,
            limit: 10,
        }
    }

    fn ltm(content: &str, entity: &str) -> Memory {
        let mut m = Memory::new(content, MemoryType::Semantic).with_layer(MemoryLayer::Ltm);
        m.entities = vec![EntityRef::new(entity, "name")];
        m
    }

    #[tokio::test]
    async fn test_graph_follows_one_hop_relations() {
        let graph = Arc::new(InMemoryGraph::new());
        let direct = ltm("Alice writes Rust", "Alice");
        let neighbour = ltm("Bob reviews code", "Bob");
        graph.upsert_memory(&direct).await.unwrap();
        graph.upsert_memory(&neighbour).await.unwrap();
        graph
            .upsert_relation(&Relation::new("name:alice", "name:bob", "related_to", 0.5).unwrap())
            .await
            .unwrap();

        let strategy = GraphStrategy::new(Arc::new(Guarded::new(
            graph as Arc<dyn GraphAdapter>,
            &GuardPolicy::default(),
        )));
        let hits = strategy.retrieve(&query("what does alice do")).await.unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].memory.id, direct.id);
        assert_eq!(hits[0].score, 1.0);
        assert_eq!(hits[1].memory.id, neighbour.id);
        assert!((hits[1].score - 0.5).abs() < 1e-9);
        assert!(hits.iter().all(|h| h.method == RetrievalMethod::Graph));
    }

    #[tokio::test]
    async fn test_subgraph_returns_linked_non_seeds() {
        let index = Arc::new(InMemoryVectorIndex::new());
        let seed = index
            .insert(Memory::new("coffee beans roast", MemoryType::Semantic))
            .await
            .unwrap()
            .memory;
        let linked = index
            .insert(Memory::new("coffee grind size", MemoryType::Semantic))
            .await
            .unwrap()
            .memory;
        assert!(linked.links.contains(&seed.id));

        let vector: Arc<Guarded<dyn VectorNoteAdapter>> = Arc::new(Guarded::new(
            index as Arc<dyn VectorNoteAdapter>,
            &GuardPolicy::default(),
        ));
        let strategy = SubgraphStrategy::new(vector);
        let mut q = query("roast");
        q.limit = 1;
        let hits = strategy.retrieve(&q).await.unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].memory.id, linked.id);
        assert_eq!(hits[0].method, RetrievalMethod::Subgraph);
    }
}
