//! Adapter configuration
//!
//! One structured section per adapter. Every constructor calls the section's
//! `validate()` first, so a bad configuration fails before any operation runs.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Backend name for the process-local implementations.
pub const BACKEND_INMEMORY: &str = "inmemory";
/// Backend name for SurrealDB-backed implementations.
pub const BACKEND_SURREALDB: &str = "surrealdb";

/// URI schemes the SurrealDB client is built with.
const SURREAL_SCHEMES: &[&str] = &["mem", "surrealkv", "ws", "wss"];

fn validate_surreal_uri(section: &str, uri: Option<&str>) -> Result<(), ConfigError> {
    let uri = uri
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| ConfigError::new(section, "uri is required for backend surrealdb"))?;
    let scheme = uri
        .split_once("://")
        .map(|(scheme, _)| scheme)
        .ok_or_else(|| ConfigError::new(section, format!("uri {uri} has no scheme")))?;
    if !SURREAL_SCHEMES.contains(&scheme) {
        return Err(ConfigError::new(
            section,
            format!(
                "uri scheme {scheme} is not supported by surrealdb (expected one of {})",
                SURREAL_SCHEMES.join(", ")
            ),
        ));
    }
    Ok(())
}

fn unknown_backend(section: &str, backend: &str, known: &[&str]) -> ConfigError {
    ConfigError::new(
        section,
        format!("unknown backend {backend} (expected one of {})", known.join(", ")),
    )
}

fn default_namespace() -> String {
    "mnemo".to_string()
}

fn default_database() -> String {
    "main".to_string()
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// DA tier storage backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// "inmemory" or "surrealdb"
    pub backend: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub db: Option<u32>,
    /// Connection URI for surrealdb (e.g. "mem://", "ws://localhost:8000")
    pub uri: Option<String>,
    pub namespace: String,
    pub database: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BACKEND_INMEMORY.to_string(),
            host: None,
            port: None,
            db: None,
            uri: None,
            namespace: default_namespace(),
            database: default_database(),
            user: None,
            password: None,
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.backend.as_str() {
            BACKEND_INMEMORY => {}
            BACKEND_SURREALDB => validate_surreal_uri("storage", self.effective_uri().as_deref())?,
            other => {
                return Err(unknown_backend(
                    "storage",
                    other,
                    &[BACKEND_INMEMORY, BACKEND_SURREALDB],
                ))
            }
        }
        if self.port == Some(0) {
            return Err(ConfigError::new("storage", "port must be non-zero"));
        }
        Ok(())
    }

    /// `uri` if set, otherwise `ws://host:port` built from the host/port pair.
    pub fn effective_uri(&self) -> Option<String> {
        if let Some(uri) = &self.uri {
            return Some(uri.clone());
        }
        self.host
            .as_ref()
            .map(|host| format!("ws://{}:{}", host, self.port.unwrap_or(8000)))
    }
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

/// LTM graph backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// "inmemory" or "surrealdb"
    pub backend: String,
    pub uri: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub namespace: String,
    pub database: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            backend: BACKEND_INMEMORY.to_string(),
            uri: None,
            user: None,
            password: None,
            namespace: default_namespace(),
            database: default_database(),
        }
    }
}

impl GraphConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.backend.as_str() {
            BACKEND_INMEMORY => Ok(()),
            BACKEND_SURREALDB => {
                validate_surreal_uri("graph", self.uri.as_deref())?;
                if self.user.is_some() != self.password.is_some() {
                    return Err(ConfigError::new(
                        "graph",
                        "user and password must be set together",
                    ));
                }
                Ok(())
            }
            other => Err(unknown_backend(
                "graph",
                other,
                &[BACKEND_INMEMORY, BACKEND_SURREALDB],
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// VectorNote
// ---------------------------------------------------------------------------

/// Similarity index and embedding configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorNoteConfig {
    /// Index backend; only "inmemory" ships
    pub backend: String,
    /// Token-weight file for the local hashing embedder
    pub embedding_model_path: Option<String>,
    /// HTTP embedding service endpoint
    pub embedding_service_url: Option<String>,
    /// Model name sent to the embedding service
    pub embedding_model: String,
    /// Embedding width for the local embedder
    pub dimension: usize,
    pub index_host: Option<String>,
    pub index_port: Option<u16>,
    pub collection_name: String,
    /// Similarity at or above which a new note is merged into an existing one
    pub dedup_threshold: f32,
    /// Neighbours linked to a freshly inserted note
    pub link_top_k: usize,
    /// Neighbours below this similarity are not linked
    pub min_link_similarity: f32,
}

impl Default for VectorNoteConfig {
    fn default() -> Self {
        Self {
            backend: BACKEND_INMEMORY.to_string(),
            embedding_model_path: None,
            embedding_service_url: None,
            embedding_model: "nomic-embed-text".to_string(),
            dimension: 256,
            index_host: None,
            index_port: None,
            collection_name: "memories".to_string(),
            dedup_threshold: 0.92,
            link_top_k: 5,
            min_link_similarity: 0.1,
        }
    }
}

impl VectorNoteConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend != BACKEND_INMEMORY {
            return Err(unknown_backend("vector", &self.backend, &[BACKEND_INMEMORY]));
        }
        if self.embedding_model_path.is_some() && self.embedding_service_url.is_some() {
            return Err(ConfigError::new(
                "vector",
                "embedding_model_path and embedding_service_url are mutually exclusive",
            ));
        }
        if let Some(url) = &self.embedding_service_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::new(
                    "vector",
                    format!("embedding_service_url {url} must be an http(s) URL"),
                ));
            }
        }
        if let Some(path) = &self.embedding_model_path {
            if path.trim().is_empty() {
                return Err(ConfigError::new("vector", "embedding_model_path is empty"));
            }
        }
        if self.dimension == 0 {
            return Err(ConfigError::new("vector", "dimension must be positive"));
        }
        if self.index_port == Some(0) {
            return Err(ConfigError::new("vector", "index_port must be non-zero"));
        }
        if self.collection_name.trim().is_empty() {
            return Err(ConfigError::new("vector", "collection_name must not be empty"));
        }
        if !(self.dedup_threshold > 0.0 && self.dedup_threshold <= 1.0) {
            return Err(ConfigError::new(
                "vector",
                format!("dedup_threshold {} outside (0, 1]", self.dedup_threshold),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_link_similarity) {
            return Err(ConfigError::new(
                "vector",
                format!(
                    "min_link_similarity {} outside [0, 1]",
                    self.min_link_similarity
                ),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// Analyzer name for the built-in lexical analyzer.
pub const ANALYZER_KEYWORD: &str = "keyword";

/// Content-analysis configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationConfig {
    /// Name of the analyzer the engine is built with
    pub analyzer: String,
    /// Longest text handed to the analyzer
    pub max_chars: usize,
}

impl Default for OperationConfig {
    fn default() -> Self {
        Self {
            analyzer: ANALYZER_KEYWORD.to_string(),
            max_chars: 2000,
        }
    }
}

impl OperationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.analyzer.trim().is_empty() {
            return Err(ConfigError::new("operation", "analyzer must not be empty"));
        }
        if self.max_chars == 0 {
            return Err(ConfigError::new("operation", "max_chars must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        StorageConfig::default().validate().unwrap();
        GraphConfig::default().validate().unwrap();
        VectorNoteConfig::default().validate().unwrap();
        OperationConfig::default().validate().unwrap();
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let cfg = StorageConfig {
            backend: "redis".into(),
            ..StorageConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.section, "storage");
        assert!(err.reason.contains("unknown backend redis"));
    }

    #[test]
    fn surreal_graph_requires_uri() {
        let cfg = GraphConfig {
            backend: BACKEND_SURREALDB.into(),
            ..GraphConfig::default()
        };
        assert!(cfg.validate().unwrap_err().reason.contains("uri is required"));
    }

    #[test]
    fn surreal_graph_rejects_foreign_scheme() {
        let cfg = GraphConfig {
            backend: BACKEND_SURREALDB.into(),
            uri: Some("bolt://localhost:7687".into()),
            ..GraphConfig::default()
        };
        assert!(cfg.validate().unwrap_err().reason.contains("scheme bolt"));
    }

    #[test]
    fn surreal_graph_accepts_mem_uri() {
        let cfg = GraphConfig {
            backend: BACKEND_SURREALDB.into(),
            uri: Some("mem://".into()),
            ..GraphConfig::default()
        };
        cfg.validate().unwrap();
    }

    #[test]
    fn storage_uri_falls_back_to_host_port() {
        let cfg = StorageConfig {
            backend: BACKEND_SURREALDB.into(),
            host: Some("db.internal".into()),
            port: Some(8001),
            ..StorageConfig::default()
        };
        assert_eq!(cfg.effective_uri().as_deref(), Some("ws://db.internal:8001"));
        cfg.validate().unwrap();
    }

    #[test]
    fn embedding_sources_are_exclusive() {
        let cfg = VectorNoteConfig {
            embedding_model_path: Some("weights.tsv".into()),
            embedding_service_url: Some("http://localhost:11434/api/embeddings".into()),
            ..VectorNoteConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn embedding_url_must_be_http() {
        let cfg = VectorNoteConfig {
            embedding_service_url: Some("ftp://example".into()),
            ..VectorNoteConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn dedup_threshold_bounds() {
        let cfg = VectorNoteConfig {
            dedup_threshold: 0.0,
            ..VectorNoteConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_from_json() {
        let cfg: GraphConfig = from_json(
            r#"{"backend":"surrealdb","uri":"ws://localhost:8000","user":"root","password":"root"}"#,
        );
        cfg.validate().unwrap();
        assert_eq!(cfg.namespace, "mnemo");
    }

    fn from_json<T: serde::de::DeserializeOwned>(json: &str) -> T {
        serde_json::from_str(json).unwrap()
    }
}
