//! Succeeded request keys

use crate::storage::{HistoryRecord, HistoryStorage, StorageResult};
use std::collections::HashSet;

/// Keys of requests that completed successfully
///
/// `old` holds keys already durable in the backend, `new` holds keys recorded
/// since the last flush.
#[derive(Debug, Default)]
pub(crate) struct SuccessSet {
    pub(crate) inherited: bool,
    pub(crate) old: HashSet<String>,
    pub(crate) new: HashSet<String>,
}

impl SuccessSet {
    pub(crate) fn clear(&mut self) {
        self.old.clear();
        self.new.clear();
    }

    pub(crate) fn has(&self, key: &str) -> bool {
        self.old.contains(key) || self.new.contains(key)
    }

    pub(crate) fn upsert(&mut self, key: &str) -> bool {
        if self.has(key) {
            return false;
        }
        self.new.insert(key.to_string())
    }

    pub(crate) fn delete(&mut self, key: &str) {
        self.new.remove(key);
    }

    pub(crate) fn pending(&self) -> Vec<String> {
        self.new.iter().cloned().collect()
    }

    /// Moves `keys` from `new` into `old`
    pub(crate) fn commit(&mut self, keys: Vec<String>) {
        for key in keys {
            self.new.remove(&key);
            self.old.insert(key);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.old.len() + self.new.len()
    }
}

/// Writes `keys` to `table`
///
/// Returns whether the keys should be treated as durable, which append-only
/// backends report even when the write failed.
pub(crate) fn write_keys<S: HistoryStorage + ?Sized>(
    backend: &S,
    table: &str,
    keys: &[String],
) -> (bool, StorageResult<usize>) {
    let records: Vec<HistoryRecord> = keys.iter().map(HistoryRecord::key_only).collect();
    let result = backend.insert_many(table, &records);
    let committed = result.is_ok() || backend.is_append_only();
    (committed, result)
}
