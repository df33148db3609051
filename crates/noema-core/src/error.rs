use crate::types::{EntityId, FactId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, NoemaError>;

#[derive(Debug, Error)]
pub enum NoemaError {
    #[error("Storage error: {0}")]
    Storage(#[from] redb::Error),

    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Storage operation error: {0}")]
    StorageOperation(#[from] redb::StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Consistency error: fact {fact} rejected: {reason}")]
    Consistency { fact: String, reason: String },

    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    #[error("Fact not found: {0}")]
    FactNotFound(FactId),

    #[error("Provider unavailable: {provider}: {reason}")]
    ProviderUnavailable { provider: String, reason: String },

    #[error("Backward chaining exceeded maximum depth {depth}")]
    DepthExceeded { depth: usize },

    #[error("Constraint solver timed out after {after_ms}ms")]
    SolverTimeout { after_ms: u64 },

    #[error("Rule set exhausted after {firings} firings")]
    RuleSetExhausted { firings: usize },

    #[error("Storage corruption: {0}")]
    StorageCorruption(String),

    #[error("Lock poisoned: {0}")]
    Lock(String),
}

impl From<toml::de::Error> for NoemaError {
    fn from(e: toml::de::Error) -> Self {
        NoemaError::Config(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for NoemaError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        NoemaError::Lock(e.to_string())
    }
}

impl NoemaError {
    pub fn provider(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        NoemaError::ProviderUnavailable {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    pub fn consistency(fact: impl fmt::Display, reason: impl Into<String>) -> Self {
        NoemaError::Consistency {
            fact: fact.to_string(),
            reason: reason.into(),
        }
    }

    /// Machine-readable code surfaced on pipeline results.
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            NoemaError::Validation(_)
            | NoemaError::EntityNotFound(_)
            | NoemaError::FactNotFound(_) => ReasonCode::InvalidInput,
            NoemaError::Consistency { .. } => ReasonCode::ConsistencyRejected,
            NoemaError::ProviderUnavailable { .. } => ReasonCode::ProviderUnavailable,
            NoemaError::DepthExceeded { .. } => ReasonCode::DepthExceeded,
            NoemaError::SolverTimeout { .. } => ReasonCode::SolverTimeout,
            NoemaError::RuleSetExhausted { .. } => ReasonCode::RuleSetExhausted,
            NoemaError::StorageCorruption(_) => ReasonCode::StorageCorruption,
            NoemaError::Config(_) => ReasonCode::Internal,
            NoemaError::Lock(_) => ReasonCode::Internal,
            _ => ReasonCode::StorageError,
        }
    }
}

/// Failure conditions reported alongside a low-confidence pipeline result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    InvalidInput,
    ProviderUnavailable,
    DepthExceeded,
    SolverTimeout,
    RuleSetExhausted,
    ConsistencyRejected,
    StorageError,
    StorageCorruption,
    DeadlineExceeded,
    NoAnswer,
    Internal,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::InvalidInput => "invalid_input",
            ReasonCode::ProviderUnavailable => "provider_unavailable",
            ReasonCode::DepthExceeded => "depth_exceeded",
            ReasonCode::SolverTimeout => "solver_timeout",
            ReasonCode::RuleSetExhausted => "rule_set_exhausted",
            ReasonCode::ConsistencyRejected => "consistency_rejected",
            ReasonCode::StorageError => "storage_error",
            ReasonCode::StorageCorruption => "storage_corruption",
            ReasonCode::DeadlineExceeded => "deadline_exceeded",
            ReasonCode::NoAnswer => "no_answer",
            ReasonCode::Internal => "internal",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes() {
        assert_eq!(
            NoemaError::Validation("x".into()).reason_code(),
            ReasonCode::InvalidInput
        );
        assert_eq!(
            NoemaError::SolverTimeout { after_ms: 5 }.reason_code(),
            ReasonCode::SolverTimeout
        );
        assert_eq!(
            NoemaError::provider("hashed", "down").reason_code(),
            ReasonCode::ProviderUnavailable
        );
        assert_eq!(ReasonCode::DepthExceeded.to_string(), "depth_exceeded");
    }
}
