//! SurrealDB-backed DA storage
//!
//! TTL is stored as an absolute wall-clock deadline (epoch millis) and
//! enforced on read; expired rows are deleted lazily.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, instrument};

use crate::config::StorageConfig;
use crate::error::{AdapterError, AdapterResult};
use crate::model::{Memory, MemoryId};
use crate::surreal::{self, Liveness, SurrealTarget};
use crate::traits::{Adapter, StorageAdapter};

const NAME: &str = "storage";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DaRow {
    memory_id: String,
    payload: String,
    #[serde(default)]
    expires_at_ms: Option<i64>,
}

impl DaRow {
    fn is_live(&self, now_ms: i64) -> bool {
        !matches!(self.expires_at_ms, Some(at) if now_ms >= at)
    }
}

/// DA tier storage on SurrealDB.
pub struct SurrealStorage {
    db: Surreal<Any>,
    liveness: Liveness,
}

impl SurrealStorage {
    /// Connect to the embedded in-memory engine.
    pub async fn in_memory() -> AdapterResult<Self> {
        Self::connect(&SurrealTarget::in_memory()).await
    }

    pub async fn from_config(config: &StorageConfig) -> AdapterResult<Self> {
        let uri = config
            .effective_uri()
            .ok_or_else(|| AdapterError::invalid_input(NAME, "storage uri is not configured"))?;
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

    async fn rows(&self) -> AdapterResult<Vec<DaRow>> {
        let result = self
            .db
            .query("SELECT memory_id, payload, expires_at_ms FROM da_memories")
            .await
            .and_then(|mut res| res.take::<Vec<DaRow>>(0));
        self.liveness.observe(NAME, result)
    }

    async fn delete_ids(&self, ids: Vec<String>) -> AdapterResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let result = self
            .db
            .query("DELETE FROM da_memories WHERE memory_id IN $ids")
            .bind(("ids", ids))
            .await
            .and_then(|res| res.check());
        self.liveness.observe(NAME, result).map(|_| ())
    }
}

impl Adapter for SurrealStorage {
    fn name(&self) -> &str {
        NAME
    }

    fn is_available(&self) -> bool {
        self.liveness.get()
    }
}

#[async_trait]
impl StorageAdapter for SurrealStorage {
    #[instrument(skip(self, memory), fields(memory_id = %memory.id))]
    async fn put(&self, memory: &Memory, ttl: Option<Duration>) -> AdapterResult<()> {
        memory
            .validate()
            .map_err(|e| AdapterError::invalid_input(NAME, e.to_string()))?;
        let expires_at_ms = ttl.map(|ttl| {
            let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
            Utc::now().timestamp_millis().saturating_add(ttl_ms)
        });
        let row = DaRow {
            memory_id: memory.id.to_string(),
            payload: serde_json::to_string(memory)?,
            expires_at_ms,
        };
        let id = row.memory_id.clone();

        let result = self
            .db
            .query(
                "BEGIN TRANSACTION; \
                 DELETE FROM da_memories WHERE memory_id = $id; \
                 CREATE da_memories CONTENT $row; \
                 COMMIT TRANSACTION;",
            )
            .bind(("id", id))
            .bind(("row", row))
            .await
            .and_then(|res| res.check());
        self.liveness.observe(NAME, result)?;
        debug!("stored DA memory");
        Ok(())
    }

    async fn get(&self, id: &MemoryId) -> AdapterResult<Option<Memory>> {
        let id_owned = id.to_string();
        let result = self
            .db
            .query("SELECT memory_id, payload, expires_at_ms FROM da_memories WHERE memory_id = $id")
            .bind(("id", id_owned))
            .await
            .and_then(|mut res| res.take::<Vec<DaRow>>(0));
        let rows = self.liveness.observe(NAME, result)?;

        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };
        if !row.is_live(Utc::now().timestamp_millis()) {
            self.delete_ids(vec![row.memory_id]).await?;
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&row.payload)?))
    }

    async fn delete(&self, id: &MemoryId) -> AdapterResult<bool> {
        let id_owned = id.to_string();
        let result = self
            .db
            .query("DELETE FROM da_memories WHERE memory_id = $id RETURN BEFORE")
            .bind(("id", id_owned))
            .await
            .and_then(|mut res| res.take::<Vec<DaRow>>(0));
        let removed = self.liveness.observe(NAME, result)?;
        let now_ms = Utc::now().timestamp_millis();
        Ok(removed.iter().any(|row| row.is_live(now_ms)))
    }

    async fn list(&self) -> AdapterResult<Vec<Memory>> {
        let now_ms = Utc::now().timestamp_millis();
        let (live, expired): (Vec<DaRow>, Vec<DaRow>) =
            self.rows().await?.into_iter().partition(|row| row.is_live(now_ms));
        self.delete_ids(expired.into_iter().map(|row| row.memory_id).collect())
            .await?;

        let mut memories = live
            .iter()
            .map(|row| serde_json::from_str::<Memory>(&row.payload))
            .collect::<Result<Vec<_>, _>>()?;
        memories.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(memories)
    }
}
