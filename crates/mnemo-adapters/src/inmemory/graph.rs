use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{lock, Availability};
use crate::error::{AdapterError, AdapterResult};
use crate::model::{Entity, Memory, MemoryId, Relation};
use crate::text;
use crate::traits::{Adapter, EntityMatch, GraphAdapter};

const NAME: &str = "graph";

type RelationKey = (String, String, String);

#[derive(Debug, Default)]
struct GraphState {
    entities: HashMap<String, Entity>,
    relations: HashMap<RelationKey, Relation>,
    memories: HashMap<MemoryId, Memory>,
    /// entity id -> memories mentioning it
    mentions: HashMap<String, BTreeSet<MemoryId>>,
}

impl GraphState {
    fn unlink_mentions(&mut self, id: &MemoryId) {
        for ids in self.mentions.values_mut() {
            ids.remove(id);
        }
        self.mentions.retain(|_, ids| !ids.is_empty());
    }
}

/// In-memory property graph of entities, relations and long-term memories.
#[derive(Debug, Default)]
pub struct InMemoryGraph {
    state: Mutex<GraphState>,
    available: Availability,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle liveness. While unavailable every call fails with `NotAvailable`.
    pub fn set_available(&self, available: bool) {
        self.available.set(available);
    }

    pub fn entity_count(&self) -> usize {
        lock(&self.state).entities.len()
    }

    pub fn relation_count(&self) -> usize {
        lock(&self.state).relations.len()
    }
}

impl Adapter for InMemoryGraph {
    fn name(&self) -> &str {
        NAME
    }

    fn is_available(&self) -> bool {
        self.available.get()
    }
}

#[async_trait]
impl GraphAdapter for InMemoryGraph {
    async fn upsert_entity(&self, entity: &Entity) -> AdapterResult<()> {
        self.available.ensure(NAME)?;
        if entity.name.trim().is_empty() || entity.id.is_empty() {
            return Err(AdapterError::invalid_input(NAME, "entity name must not be empty"));
        }
        lock(&self.state)
            .entities
            .insert(entity.id.clone(), entity.clone());
        Ok(())
    }

    async fn upsert_relation(&self, relation: &Relation) -> AdapterResult<()> {
        self.available.ensure(NAME)?;
        if relation.source.is_empty() || relation.target.is_empty() {
            return Err(AdapterError::invalid_input(
                NAME,
                "relation endpoints must not be empty",
            ));
        }
        let key = (
            relation.source.clone(),
            relation.target.clone(),
            relation.relation_type.clone(),
        );
        lock(&self.state).relations.insert(key, relation.clone());
        Ok(())
    }

    async fn upsert_memory(&self, memory: &Memory) -> AdapterResult<()> {
        self.available.ensure(NAME)?;
        memory
            .validate()
            .map_err(|e| AdapterError::invalid_input(NAME, e.to_string()))?;

        let mut state = lock(&self.state);
        state.unlink_mentions(&memory.id);
        for entity_ref in &memory.entities {
            state
                .entities
                .entry(entity_ref.id.clone())
                .or_insert_with(|| Entity::from(entity_ref));
            state
                .mentions
                .entry(entity_ref.id.clone())
                .or_default()
                .insert(memory.id.clone());
        }
        state.memories.insert(memory.id.clone(), memory.clone());
        Ok(())
    }

    async fn get_memory(&self, id: &MemoryId) -> AdapterResult<Option<Memory>> {
        self.available.ensure(NAME)?;
        Ok(lock(&self.state).memories.get(id).cloned())
    }

    async fn delete_memory(&self, id: &MemoryId) -> AdapterResult<bool> {
        self.available.ensure(NAME)?;
        let mut state = lock(&self.state);
        state.unlink_mentions(id);
        Ok(state.memories.remove(id).is_some())
    }

    async fn find_entities(&self, query: &str, limit: usize) -> AdapterResult<Vec<EntityMatch>> {
        self.available.ensure(NAME)?;
        let query_norm = text::normalize(query);
        let query_tokens: HashSet<String> = text::tokenize(query).into_iter().collect();

        let state = lock(&self.state);
        let mut matches: Vec<EntityMatch> = state
            .entities
            .values()
            .filter_map(|entity| {
                let score = text::name_match_score(&entity.name, &query_norm, &query_tokens);
                (score > 0.0).then(|| EntityMatch {
                    entity: entity.clone(),
                    score,
                })
            })
            .collect();
        matches.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.entity.id.cmp(&b.entity.id))
        });
        matches.truncate(limit);
        Ok(matches)
    }

    async fn memories_for_entity(&self, entity_id: &str) -> AdapterResult<Vec<Memory>> {
        self.available.ensure(NAME)?;
        let state = lock(&self.state);
        let mut memories: Vec<Memory> = state
            .mentions
            .get(entity_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.memories.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        memories.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(memories)
    }

    async fn relations(&self, entity_id: &str) -> AdapterResult<Vec<Relation>> {
        self.available.ensure(NAME)?;
        let state = lock(&self.state);
        let mut relations: Vec<Relation> = state
            .relations
            .values()
            .filter(|r| r.source == entity_id || r.target == entity_id)
            .cloned()
            .collect();
        relations.sort_by(|a, b| {
            b.strength
                .total_cmp(&a.strength)
                .then_with(|| a.source.cmp(&b.source))
                .then_with(|| a.target.cmp(&b.target))
        });
        Ok(relations)
    }
}
