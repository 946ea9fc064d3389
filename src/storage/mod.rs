//! Storage module for persisting request history
//!
//! This module handles every durable write the scheduler makes:
//! - Success keys, so requests done in an earlier run are never fetched again
//! - Failed requests, so they can be retried by the next run
//!
//! Three interchangeable backends are provided and selected by the
//! `[history] output` setting.

mod document;
mod file;
mod schema;
mod sqlite;
mod traits;

pub use document::DocumentHistory;
pub use file::FileHistory;
pub use sqlite::SqliteHistory;
pub use traits::{HistoryRecord, HistoryStorage, StorageError, StorageResult};

use crate::config::HistoryConfig;
use crate::{ConfigError, ConfigResult};
use serde::Deserialize;
use std::fmt;
use std::path::Path;

/// Which backend history is written to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// One flat file per table
    #[default]
    File,
    /// Relational tables in SQLite
    Sqlite,
    /// Document collections in sled
    Sled,
}

impl OutputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Sqlite => "sqlite",
            Self::Sled => "sled",
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The configured history backend
///
/// The set of backends is closed, so dispatch is a plain match.
pub enum Backend {
    File(FileHistory),
    Sqlite(SqliteHistory),
    Document(DocumentHistory),
}

impl Backend {
    /// Opens the backend selected by `config.output`
    ///
    /// # Returns
    ///
    /// * `Err(ConfigError::MissingBackend)` - The location setting for the
    ///   selected backend is absent
    /// * `Err(ConfigError::Validation)` - The backend could not be opened
    pub fn open(config: &HistoryConfig) -> ConfigResult<Self> {
        let missing = |setting: &str| ConfigError::MissingBackend {
            output: config.output.to_string(),
            setting: setting.to_string(),
        };
        let opened = match config.output {
            OutputKind::File => {
                let dir = config.history_dir.as_deref().ok_or_else(|| missing("history-dir"))?;
                FileHistory::new(dir).map(Backend::File)
            }
            OutputKind::Sqlite => {
                let path = config
                    .database_path
                    .as_deref()
                    .ok_or_else(|| missing("database-path"))?;
                SqliteHistory::new(Path::new(path)).map(Backend::Sqlite)
            }
            OutputKind::Sled => {
                let path = config.sled_path.as_deref().ok_or_else(|| missing("sled-path"))?;
                DocumentHistory::new(Path::new(path)).map(Backend::Document)
            }
        };
        opened.map_err(|e| {
            ConfigError::Validation(format!("cannot open {} history backend: {}", config.output, e))
        })
    }

    pub fn kind(&self) -> OutputKind {
        match self {
            Self::File(_) => OutputKind::File,
            Self::Sqlite(_) => OutputKind::Sqlite,
            Self::Document(_) => OutputKind::Sled,
        }
    }

    fn inner(&self) -> &dyn HistoryStorage {
        match self {
            Self::File(b) => b,
            Self::Sqlite(b) => b,
            Self::Document(b) => b,
        }
    }
}

impl HistoryStorage for Backend {
    fn read_all(&self, table: &str) -> StorageResult<Vec<HistoryRecord>> {
        self.inner().read_all(table)
    }

    fn insert_many(&self, table: &str, records: &[HistoryRecord]) -> StorageResult<usize> {
        self.inner().insert_many(table, records)
    }

    fn replace_all(&self, table: &str, records: &[HistoryRecord]) -> StorageResult<usize> {
        self.inner().replace_all(table, records)
    }

    fn is_append_only(&self) -> bool {
        self.inner().is_append_only()
    }
}
