use thiserror::Error;
use uuid::Uuid;

use crate::types::index::IndexStatus;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Storage error: {0}")]
    Storage(#[from] rocksdb::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] Box<bincode::ErrorKind>),

    #[error("Column family missing: {0}")]
    ColumnFamily(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Index already exists: {0}")]
    DuplicateIndex(String),

    #[error("Uniqueness violation on index {index}: key {key} is already taken")]
    UniquenessViolation { index: String, key: String },

    #[error("Transaction conflict: {0}")]
    Conflict(String),

    #[error("Timed out waiting for index {index} to reach {status:?}")]
    Timeout { index: String, status: IndexStatus },

    #[error("Vertex not found: {0}")]
    VertexNotFound(Uuid),

    #[error("Edge not found: {0}")]
    EdgeNotFound(Uuid),

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Invalid traversal: {0}")]
    InvalidTraversal(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Job cancelled: {0}")]
    Cancelled(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl GraphError {
    /// Conflicts and timeouts can succeed on a retry; everything else needs a fix first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GraphError::Conflict(_) | GraphError::Timeout { .. })
    }
}

impl From<tokio::task::JoinError> for GraphError {
    fn from(e: tokio::task::JoinError) -> Self {
        GraphError::Task(e.to_string())
    }
}

pub(crate) fn lock_err<E: std::fmt::Display>(e: E) -> GraphError {
    GraphError::Transaction(format!("Lock failed: {}", e))
}

pub type Result<T> = std::result::Result<T, GraphError>;
