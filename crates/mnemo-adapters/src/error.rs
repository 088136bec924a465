//! Error types for mnemo-adapters

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of an [`AdapterError`].
///
/// Retry policies and circuit breakers decide on the class, not on the
/// concrete variant payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    NotAvailable,
    InvalidInput,
    NotFound,
    Timeout,
    CircuitOpen,
    Internal,
}

impl ErrorClass {
    /// Whether an error of this class says something about the health of the
    /// backend (as opposed to the caller's input).
    pub fn is_dependency_failure(self) -> bool {
        matches!(self, Self::NotAvailable | Self::Timeout | Self::Internal)
    }
}

/// Errors raised by adapter calls. Every variant names the adapter it came from.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdapterError {
    /// The adapter failed its liveness check
    #[error("adapter {adapter} is not available")]
    NotAvailable { adapter: String },

    /// The request was rejected before reaching the backend
    #[error("adapter {adapter} rejected input: {reason}")]
    InvalidInput { adapter: String, reason: String },

    /// A keyed lookup found nothing where something was required
    #[error("adapter {adapter}: {id} not found")]
    NotFound { adapter: String, id: String },

    /// A single attempt exceeded its deadline
    #[error("adapter {adapter} timed out after {elapsed_ms}ms")]
    Timeout { adapter: String, elapsed_ms: u64 },

    /// The circuit breaker in front of the adapter rejected the call
    #[error("circuit breaker open for adapter {adapter} ({consecutive_failures} consecutive failures)")]
    CircuitOpen {
        adapter: String,
        consecutive_failures: u32,
    },

    /// Backend failure (connection, query, serialization, ...)
    #[error("adapter {adapter} failed: {cause}")]
    Internal { adapter: String, cause: String },
}

impl AdapterError {
    pub fn not_available(adapter: impl Into<String>) -> Self {
        Self::NotAvailable {
            adapter: adapter.into(),
        }
    }

    pub fn invalid_input(adapter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            adapter: adapter.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(adapter: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            adapter: adapter.into(),
            id: id.into(),
        }
    }

    pub fn internal(adapter: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::Internal {
            adapter: adapter.into(),
            cause: cause.to_string(),
        }
    }

    /// Name of the adapter that produced this error.
    pub fn adapter(&self) -> &str {
        match self {
            Self::NotAvailable { adapter }
            | Self::InvalidInput { adapter, .. }
            | Self::NotFound { adapter, .. }
            | Self::Timeout { adapter, .. }
            | Self::CircuitOpen { adapter, .. }
            | Self::Internal { adapter, .. } => adapter,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NotAvailable { .. } => ErrorClass::NotAvailable,
            Self::InvalidInput { .. } => ErrorClass::InvalidInput,
            Self::NotFound { .. } => ErrorClass::NotFound,
            Self::Timeout { .. } => ErrorClass::Timeout,
            Self::CircuitOpen { .. } => ErrorClass::CircuitOpen,
            Self::Internal { .. } => ErrorClass::Internal,
        }
    }

    pub fn is_not_available(&self) -> bool {
        matches!(self, Self::NotAvailable { .. })
    }
}

/// Fatal configuration error, raised only while validating or constructing
/// an adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {section} configuration: {reason}")]
pub struct ConfigError {
    pub section: String,
    pub reason: String,
}

impl ConfigError {
    pub fn new(section: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            section: section.into(),
            reason: reason.into(),
        }
    }
}

/// Violations of data model invariants
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("memory id must not be empty")]
    EmptyId,

    #[error("content must not be empty")]
    EmptyContent,

    #[error("memory {0} cannot link to itself")]
    SelfLink(String),

    #[error("entity name must not be empty")]
    EmptyEntityName,

    #[error("relation endpoints must not be empty")]
    EmptyRelationEndpoint,

    #[error("relation strength {0} outside [0, 1]")]
    StrengthOutOfRange(f32),

    #[error("task description must not be empty")]
    EmptyTaskDescription,
}

impl From<surrealdb::Error> for AdapterError {
    fn from(err: surrealdb::Error) -> Self {
        AdapterError::internal("surrealdb", err)
    }
}

impl From<serde_json::Error> for AdapterError {
    fn from(err: serde_json::Error) -> Self {
        AdapterError::internal("serialization", err)
    }
}

/// Result type for adapter calls
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_name_is_preserved() {
        let err = AdapterError::internal("graph", "connection reset");
        assert_eq!(err.adapter(), "graph");
        assert_eq!(err.class(), ErrorClass::Internal);
        assert_eq!(err.to_string(), "adapter graph failed: connection reset");
    }

    #[test]
    fn dependency_failures_exclude_caller_errors() {
        assert!(ErrorClass::Timeout.is_dependency_failure());
        assert!(ErrorClass::NotAvailable.is_dependency_failure());
        assert!(!ErrorClass::InvalidInput.is_dependency_failure());
        assert!(!ErrorClass::NotFound.is_dependency_failure());
        assert!(!ErrorClass::CircuitOpen.is_dependency_failure());
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::new("graph", "uri is required for backend surrealdb");
        assert_eq!(
            err.to_string(),
            "invalid graph configuration: uri is required for backend surrealdb"
        );
    }
}
