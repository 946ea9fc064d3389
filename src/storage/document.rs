//! Document-store history backend on sled
//!
//! Each history table is a sled tree; each entry is a small JSON document
//! keyed by the request key.

use crate::storage::traits::{HistoryRecord, HistoryStorage, StorageError, StorageResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure: Option<String>,
}

/// Sled-backed history collections
pub struct DocumentHistory {
    db: sled::Db,
    trees: RwLock<HashMap<String, sled::Tree>>,
}

impl DocumentHistory {
    /// Opens or creates the sled database at `path`
    pub fn new(path: &Path) -> StorageResult<Self> {
        Ok(Self::from_db(sled::open(path)?))
    }

    /// Creates a throwaway database (for testing)
    #[cfg(test)]
    pub fn new_temporary() -> StorageResult<Self> {
        Ok(Self::from_db(sled::Config::new().temporary(true).open()?))
    }

    fn from_db(db: sled::Db) -> Self {
        Self {
            db,
            trees: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached tree handle for `name`, opening it on first use
    fn tree(&self, name: &str) -> StorageResult<sled::Tree> {
        if let Some(tree) = self.trees.read().get(name) {
            return Ok(tree.clone());
        }
        let tree = self.db.open_tree(name)?;
        self.trees.write().insert(name.to_string(), tree.clone());
        Ok(tree)
    }

    fn write_batch(&self, tree: &sled::Tree, records: &[HistoryRecord]) -> StorageResult<usize> {
        let mut batch = sled::Batch::default();
        for record in records {
            let doc = serde_json::to_vec(&Document {
                failure: record.payload.clone(),
            })?;
            batch.insert(record.key.as_bytes(), doc);
        }
        tree.apply_batch(batch)?;
        tree.flush()?;
        Ok(records.len())
    }
}

impl HistoryStorage for DocumentHistory {
    fn read_all(&self, table: &str) -> StorageResult<Vec<HistoryRecord>> {
        let tree = self.tree(table)?;
        let mut records = Vec::with_capacity(tree.len());
        for entry in tree.iter() {
            let (key, value) = entry?;
            let key = String::from_utf8(key.to_vec()).map_err(|e| StorageError::Corrupt {
                table: table.to_string(),
                message: e.to_string(),
            })?;
            let doc: Document = serde_json::from_slice(&value)?;
            records.push(HistoryRecord {
                key,
                payload: doc.failure,
            });
        }
        Ok(records)
    }

    fn insert_many(&self, table: &str, records: &[HistoryRecord]) -> StorageResult<usize> {
        let tree = self.tree(table)?;
        self.write_batch(&tree, records)
    }

    fn replace_all(&self, table: &str, records: &[HistoryRecord]) -> StorageResult<usize> {
        let tree = self.tree(table)?;
        tree.clear()?;
        self.write_batch(&tree, records)
    }
}
