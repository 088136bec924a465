//! SurrealDB connection and schema shared by the graph and DA backends
//!
//! Tables are SCHEMALESS; every record keeps the serialized domain value in
//! a `payload` string next to the few fields queries filter on.

use std::sync::Mutex;
use std::time::Duration;

use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;
use surrealdb::Surreal;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use crate::error::{AdapterError, AdapterResult};
use crate::inmemory::lock;

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct SurrealTarget {
    pub uri: String,
    pub namespace: String,
    pub database: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl SurrealTarget {
    /// Embedded in-memory engine, used by tests.
    pub fn in_memory() -> Self {
        Self {
            uri: "mem://".to_string(),
            namespace: "mnemo".to_string(),
            database: "main".to_string(),
            user: None,
            password: None,
        }
    }
}

/// Open a connection, sign in when credentials are given, select the
/// namespace/database and define the tables.
#[instrument(skip(target), fields(uri = %target.uri, ns = %target.namespace, db = %target.database))]
pub async fn connect(adapter: &str, target: &SurrealTarget) -> AdapterResult<Surreal<Any>> {
    let db = surrealdb::engine::any::connect(&target.uri)
        .await
        .map_err(|e| {
            AdapterError::internal(adapter, format!("failed to connect to {}: {e}", target.uri))
        })?;

    if let (Some(username), Some(password)) = (&target.user, &target.password) {
        db.signin(Root {
            username,
            password,
        })
        .await
        .map_err(|e| AdapterError::internal(adapter, format!("root authentication failed: {e}")))?;
    }

    db.use_ns(&target.namespace)
        .use_db(&target.database)
        .await
        .map_err(|e| {
            AdapterError::internal(adapter, format!("failed to select namespace/database: {e}"))
        })?;

    init_schema(adapter, &db).await?;
    info!("SurrealDB connected and schema initialized");
    Ok(db)
}

async fn init_schema(adapter: &str, db: &Surreal<Any>) -> AdapterResult<()> {
    debug!("Initializing mnemo schema");

    let schema = r#"
        -- DA tier records
        DEFINE TABLE IF NOT EXISTS da_memories SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_da_memory_id ON da_memories FIELDS memory_id UNIQUE;

        -- LTM graph: entities, weighted relations, memory nodes, mention edges
        DEFINE TABLE IF NOT EXISTS entities SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_entity_id ON entities FIELDS entity_id UNIQUE;

        DEFINE TABLE IF NOT EXISTS relations SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_relation_source ON relations FIELDS source;
        DEFINE INDEX IF NOT EXISTS idx_relation_target ON relations FIELDS target;

        DEFINE TABLE IF NOT EXISTS ltm_memories SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_ltm_memory_id ON ltm_memories FIELDS memory_id UNIQUE;

        DEFINE TABLE IF NOT EXISTS mentions SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_mention_entity ON mentions FIELDS entity_id;
        DEFINE INDEX IF NOT EXISTS idx_mention_memory ON mentions FIELDS memory_id;
    "#;

    db.query(schema)
        .await
        .and_then(|res| res.check())
        .map_err(|e| AdapterError::internal(adapter, format!("schema setup failed: {e}")))?;
    Ok(())
}

/// How long a backend that failed at the transport level reports itself
/// down before callers are let through again.
pub(crate) const RETRY_AFTER: Duration = Duration::from_secs(30);

/// Liveness as observed by the last round trip.
///
/// A transport failure marks the backend down for [`RETRY_AFTER`]. After
/// that it reports available, and the next query either clears the mark or
/// sets it again.
#[derive(Debug, Default)]
pub(crate) struct Liveness {
    down_since: Mutex<Option<Instant>>,
}

impl Liveness {
    pub(crate) fn get(&self) -> bool {
        match *lock(&self.down_since) {
            Some(since) => since.elapsed() >= RETRY_AFTER,
            None => true,
        }
    }

    fn mark_up(&self) {
        lock(&self.down_since).take();
    }

    fn mark_down(&self) {
        *lock(&self.down_since) = Some(Instant::now());
    }

    /// Record the outcome of a query and map its error to the adapter.
    pub(crate) fn observe<T>(
        &self,
        adapter: &str,
        result: Result<T, surrealdb::Error>,
    ) -> AdapterResult<T> {
        match result {
            Ok(value) => {
                self.mark_up();
                Ok(value)
            }
            Err(e) => {
                let cause = e.to_string();
                if matches!(e, surrealdb::Error::Api(_)) {
                    self.mark_down();
                }
                Err(AdapterError::internal(adapter, cause))
            }
        }
    }
}
