//! SurrealDB-backed LTM graph
//!
//! Entities, relations and memory nodes are plain records; `mentions` rows
//! connect a memory to each entity it references. Name matching is done
//! client side with the same scoring as the in-memory graph.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, instrument};

use crate::config::GraphConfig;
use crate::error::{AdapterError, AdapterResult};
use crate::model::{Entity, Memory, MemoryId, Relation};
use crate::surreal::{self, Liveness, SurrealTarget};
use crate::text;
use crate::traits::{Adapter, EntityMatch, GraphAdapter};

const NAME: &str = "graph";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntityRow {
    entity_id: String,
    payload: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RelationRow {
    source: String,
    target: String,
    relation_type: String,
    payload: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MemoryRow {
    memory_id: String,
    payload: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MentionRow {
    entity_id: String,
    memory_id: String,
}

/// LTM graph on SurrealDB.
pub struct SurrealGraph {
    db: Surreal<Any>,
    liveness: Liveness,
}

impl SurrealGraph {
    /// Connect to the embedded in-memory engine.
    pub async fn in_memory() -> AdapterResult<Self> {
        Self::connect(&SurrealTarget::in_memory()).await
    }

    pub async fn from_config(config: &GraphConfig) -> AdapterResult<Self> {
        let uri = config
            .uri
            .clone()
            .ok_or_else(|| AdapterError::invalid_input(NAME, "graph uri is not configured"))?;
        Self::connect(&SurrealTarget {
            uri,
            namespace: config.namespace.clone(),
            database: config.database.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
        })
        .await
    }

    pub async fn connect(target: &SurrealTarget) -> AdapterResult<Self> {
        let db = surreal::connect(NAME, target).await?;
        Ok(Self {
            db,
            liveness: Liveness::default(),
        })
    }

    async fn memories_by_ids(&self, ids: Vec<String>) -> AdapterResult<Vec<Memory>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let result = self
            .db
            .query("SELECT memory_id, payload FROM ltm_memories WHERE memory_id IN $ids")
            .bind(("ids", ids))
            .await
            .and_then(|mut res| res.take::<Vec<MemoryRow>>(0));
        let rows = self.liveness.observe(NAME, result)?;
        rows.iter()
            .map(|row| serde_json::from_str::<Memory>(&row.payload).map_err(AdapterError::from))
            .collect()
    }
}

impl Adapter for SurrealGraph {
    fn name(&self) -> &str {
        NAME
    }

    fn is_available(&self) -> bool {
        self.liveness.get()
    }
}

#[async_trait]
impl GraphAdapter for SurrealGraph {
    #[instrument(skip(self, entity), fields(entity_id = %entity.id))]
    async fn upsert_entity(&self, entity: &Entity) -> AdapterResult<()> {
        if entity.name.trim().is_empty() || entity.id.is_empty() {
            return Err(AdapterError::invalid_input(NAME, "entity name must not be empty"));
        }
        let row = EntityRow {
            entity_id: entity.id.clone(),
            payload: serde_json::to_string(entity)?,
        };
        let id = row.entity_id.clone();
        let result = self
            .db
            .query(
                "BEGIN TRANSACTION; \
                 DELETE FROM entities WHERE entity_id = $id; \
                 CREATE entities CONTENT $row; \
                 COMMIT TRANSACTION;",
            )
            .bind(("id", id))
            .bind(("row", row))
            .await
            .and_then(|res| res.check());
        self.liveness.observe(NAME, result)?;
        Ok(())
    }

    async fn upsert_relation(&self, relation: &Relation) -> AdapterResult<()> {
        if relation.source.is_empty() || relation.target.is_empty() {
            return Err(AdapterError::invalid_input(
                NAME,
                "relation endpoints must not be empty",
            ));
        }
        let row = RelationRow {
            source: relation.source.clone(),
            target: relation.target.clone(),
            relation_type: relation.relation_type.clone(),
            payload: serde_json::to_string(relation)?,
        };
        let (source, target, kind) = (
            row.source.clone(),
            row.target.clone(),
            row.relation_type.clone(),
        );
        let result = self
            .db
            .query(
                "BEGIN TRANSACTION; \
                 DELETE FROM relations WHERE source = $source AND target = $target AND relation_type = $kind; \
                 CREATE relations CONTENT $row; \
                 COMMIT TRANSACTION;",
            )
            .bind(("source", source))
            .bind(("target", target))
            .bind(("kind", kind))
            .bind(("row", row))
            .await
            .and_then(|res| res.check());
        self.liveness.observe(NAME, result)?;
        Ok(())
    }

    #[instrument(skip(self, memory), fields(memory_id = %memory.id))]
    async fn upsert_memory(&self, memory: &Memory) -> AdapterResult<()> {
        memory
            .validate()
            .map_err(|e| AdapterError::invalid_input(NAME, e.to_string()))?;

        // Entities referenced for the first time get a bare node.
        for entity_ref in &memory.entities {
            let entity_id = entity_ref.id.clone();
            let result = self
                .db
                .query("SELECT entity_id, payload FROM entities WHERE entity_id = $id")
                .bind(("id", entity_id))
                .await
                .and_then(|mut res| res.take::<Vec<EntityRow>>(0));
            if self.liveness.observe(NAME, result)?.is_empty() {
                self.upsert_entity(&Entity::from(entity_ref)).await?;
            }
        }

        let row = MemoryRow {
            memory_id: memory.id.to_string(),
            payload: serde_json::to_string(memory)?,
        };
        let mentions: Vec<MentionRow> = memory
            .entities
            .iter()
            .map(|e| MentionRow {
                entity_id: e.id.clone(),
                memory_id: row.memory_id.clone(),
            })
            .collect();
        let id = row.memory_id.clone();

        let result = self
            .db
            .query(
                "BEGIN TRANSACTION; \
                 DELETE FROM ltm_memories WHERE memory_id = $id; \
                 DELETE FROM mentions WHERE memory_id = $id; \
                 CREATE ltm_memories CONTENT $row; \
                 FOR $m IN $mentions { CREATE mentions CONTENT $m; }; \
                 COMMIT TRANSACTION;",
            )
            .bind(("id", id))
            .bind(("row", row))
            .bind(("mentions", mentions))
            .await
            .and_then(|res| res.check());
        self.liveness.observe(NAME, result)?;
        debug!(entities = memory.entities.len(), "stored LTM memory");
        Ok(())
    }

    async fn get_memory(&self, id: &MemoryId) -> AdapterResult<Option<Memory>> {
        Ok(self
            .memories_by_ids(vec![id.to_string()])
            .await?
            .into_iter()
            .next())
    }

    async fn delete_memory(&self, id: &MemoryId) -> AdapterResult<bool> {
        let id_owned = id.to_string();
        let result = self
            .db
            .query(
                "DELETE FROM mentions WHERE memory_id = $id; \
                 DELETE FROM ltm_memories WHERE memory_id = $id RETURN BEFORE;",
            )
            .bind(("id", id_owned))
            .await
            .and_then(|mut res| res.take::<Vec<MemoryRow>>(1));
        let removed = self.liveness.observe(NAME, result)?;
        Ok(!removed.is_empty())
    }

    async fn find_entities(&self, query: &str, limit: usize) -> AdapterResult<Vec<EntityMatch>> {
        let result = self
            .db
            .query("SELECT entity_id, payload FROM entities")
            .await
            .and_then(|mut res| res.take::<Vec<EntityRow>>(0));
        let rows = self.liveness.observe(NAME, result)?;

        let query_norm = text::normalize(query);
        let query_tokens: HashSet<String> = text::tokenize(query).into_iter().collect();
        let mut matches = Vec::new();
        for row in rows {
            let entity: Entity = serde_json::from_str(&row.payload)?;
            let score = text::name_match_score(&entity.name, &query_norm, &query_tokens);
            if score > 0.0 {
                matches.push(EntityMatch { entity, score });
            }
        }
        matches.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.entity.id.cmp(&b.entity.id))
        });
        matches.truncate(limit);
        Ok(matches)
    }

    async fn memories_for_entity(&self, entity_id: &str) -> AdapterResult<Vec<Memory>> {
        let id_owned = entity_id.to_string();
        let result = self
            .db
            .query("SELECT entity_id, memory_id FROM mentions WHERE entity_id = $id")
            .bind(("id", id_owned))
            .await
            .and_then(|mut res| res.take::<Vec<MentionRow>>(0));
        let mentions = self.liveness.observe(NAME, result)?;

        let ids: Vec<String> = mentions.into_iter().map(|m| m.memory_id).collect();
        let mut memories = self.memories_by_ids(ids).await?;
        memories.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(memories)
    }

    async fn relations(&self, entity_id: &str) -> AdapterResult<Vec<Relation>> {
        let id_owned = entity_id.to_string();
        let result = self
            .db
            .query(
                "SELECT source, target, relation_type, payload FROM relations \
                 WHERE source = $id OR target = $id",
            )
            .bind(("id", id_owned))
            .await
            .and_then(|mut res| res.take::<Vec<RelationRow>>(0));
        let rows = self.liveness.observe(NAME, result)?;

        let mut relations = rows
            .iter()
            .map(|row| serde_json::from_str::<Relation>(&row.payload))
            .collect::<Result<Vec<_>, _>>()?;
        relations.sort_by(|a, b| {
            b.strength
                .total_cmp(&a.strength)
                .then_with(|| a.source.cmp(&b.source))
                .then_with(|| a.target.cmp(&b.target))
        });
        Ok(relations)
    }
}
