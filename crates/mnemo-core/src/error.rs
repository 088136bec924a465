//! Error types for mnemo-core

use mnemo_adapters::{AdapterError, ConfigError, ModelError};

/// Why an engine operation failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FailureCause {
    /// Rejected before any adapter was contacted
    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    /// The operation deadline (including the wait for a slot) elapsed
    #[error("operation timed out after {limit_ms}ms")]
    Timeout { limit_ms: u64 },
}

impl From<ModelError> for FailureCause {
    fn from(err: ModelError) -> Self {
        FailureCause::Validation(err.to_string())
    }
}

/// Errors surfaced by [`MemoryEngine`](crate::MemoryEngine).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("retain failed: {0}")]
    Retain(FailureCause),

    #[error("recall failed: {0}")]
    Recall(FailureCause),

    #[error("reflect failed: {0}")]
    Reflect(FailureCause),

    /// Failure of a maintenance or lookup call (consolidate, cleanup, forget, get)
    #[error("{operation} failed: {cause}")]
    Maintenance {
        operation: &'static str,
        cause: FailureCause,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A backend could not be constructed
    #[error("startup failed: {0}")]
    Startup(String),
}

impl EngineError {
    /// The underlying cause for operation failures.
    pub fn cause(&self) -> Option<&FailureCause> {
        match self {
            Self::Retain(c) | Self::Recall(c) | Self::Reflect(c) => Some(c),
            Self::Maintenance { cause, .. } => Some(cause),
            Self::Config(_) | Self::Startup(_) => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.cause(), Some(FailureCause::Timeout { .. }))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self.cause(), Some(FailureCause::Validation(_)))
    }
}

/// Errors produced by the retrieval engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RetrievalError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("all {attempted} retrieval strategies failed: {}", .errors.join("; "))]
    AllStrategiesFailed {
        attempted: usize,
        errors: Vec<String>,
    },
}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_nests_cause() {
        let err = EngineError::Recall(FailureCause::Adapter(AdapterError::not_available("graph")));
        assert_eq!(err.to_string(), "recall failed: adapter graph is not available");
    }

    #[test]
    fn timeout_is_detectable() {
        let err = EngineError::Retain(FailureCause::Timeout { limit_ms: 5 });
        assert!(err.is_timeout());
        assert!(!err.is_validation());
        assert_eq!(err.to_string(), "retain failed: operation timed out after 5ms");
    }

    #[test]
    fn all_strategies_failed_lists_errors() {
        let err = RetrievalError::AllStrategiesFailed {
            attempted: 2,
            errors: vec!["graph: down".into(), "semantic: down".into()],
        };
        assert_eq!(
            err.to_string(),
            "all 2 retrieval strategies failed: graph: down; semantic: down"
        );
    }
}
