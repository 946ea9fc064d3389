//! Storage traits and error types
//!
//! This module defines the capability every history backend provides and the
//! error type shared by all of them.

use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupt history record in {table}: {message}")]
    Corrupt { table: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// One durable history entry
///
/// Success records carry only the request key. Failure records also carry the
/// serialized request so it can be resumed by a later run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRecord {
    pub key: String,
    pub payload: Option<String>,
}

impl HistoryRecord {
    pub fn key_only(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            payload: None,
        }
    }

    pub fn with_payload(key: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            payload: Some(payload.into()),
        }
    }
}

/// Trait for history backend implementations
///
/// Every backend addresses its data by a physical table name (a SQL table,
/// a sled tree, or a file). Implementations must be safe to share between
/// spider runs.
pub trait HistoryStorage: Send + Sync {
    // ===== Reading =====

    /// Loads every record stored under `table`
    ///
    /// A table that does not exist yet is reported as empty.
    fn read_all(&self, table: &str) -> StorageResult<Vec<HistoryRecord>>;

    // ===== Writing =====

    /// Adds `records` to `table`, keeping existing entries
    ///
    /// # Returns
    ///
    /// The number of records written
    fn insert_many(&self, table: &str, records: &[HistoryRecord]) -> StorageResult<usize>;

    /// Replaces the whole content of `table` with `records`
    fn replace_all(&self, table: &str, records: &[HistoryRecord]) -> StorageResult<usize>;

    /// Append-only backends give no transactional guarantee; callers treat
    /// their writes as done even when they report an error.
    fn is_append_only(&self) -> bool {
        false
    }
}
