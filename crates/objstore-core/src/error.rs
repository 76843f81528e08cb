//! Storage error types

use thiserror::Error;

/// Errors that can occur during object store operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// A required parameter was empty or absent
    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),

    /// Object store does not exist in the open database
    #[error("object store not found: {0}")]
    StoreNotFound(String),

    /// Index does not exist on the object store
    #[error("index '{index}' not found on store '{store}'")]
    IndexNotFound { store: String, index: String },

    /// Key already exists, or a unique index would be violated
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// Record or key is not usable (bad key, key path mismatch, ...)
    #[error("invalid data: {0}")]
    Data(String),

    /// Record not found for a read-modify-write
    #[error("record not found: {0}")]
    NotFound(String),

    /// Requested version is lower than the stored one
    #[error("requested version {requested} is lower than current version {current}")]
    Version { requested: u32, current: u32 },

    /// Transaction aborted or failed to commit
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Host engine error
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Connection was closed or its database deleted
    #[error("connection closed: {0}")]
    Closed(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;
