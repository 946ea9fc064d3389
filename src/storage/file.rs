//! Flat-file history backend
//!
//! Each table is one file under the history directory holding a single JSON
//! object: success entries map a key to `true`, failure entries map a key to
//! the serialized request. The file is written as a run of `,"key":value`
//! fragments so new entries can be appended without rewriting it; reading
//! replaces the leading comma with `{` and closes the object.

use crate::storage::traits::{HistoryRecord, HistoryStorage, StorageError, StorageResult};
use serde_json::{Map, Value};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// File-per-table history backend
#[derive(Debug, Clone)]
pub struct FileHistory {
    dir: PathBuf,
}

impl FileHistory {
    /// Creates a backend rooted at `dir`, creating the directory if needed
    pub fn new(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, table: &str) -> PathBuf {
        self.dir.join(table)
    }
}

/// Encodes records as `,"k":v,...` with no surrounding braces
fn encode_fragment(records: &[HistoryRecord]) -> StorageResult<String> {
    let mut object = Map::with_capacity(records.len());
    for record in records {
        let value = match &record.payload {
            Some(payload) => Value::String(payload.clone()),
            None => Value::Bool(true),
        };
        object.insert(record.key.clone(), value);
    }
    if object.is_empty() {
        return Ok(String::new());
    }
    let encoded = serde_json::to_string(&Value::Object(object))?;
    // `{...}` -> `,...`
    let inner = &encoded[1..encoded.len() - 1];
    Ok(format!(",{}", inner))
}

fn decode(table: &str, content: &str) -> StorageResult<Vec<HistoryRecord>> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let body = trimmed.strip_prefix(',').unwrap_or(trimmed);
    let object: Map<String, Value> = serde_json::from_str(&format!("{{{}}}", body))
        .map_err(|e| StorageError::Corrupt {
            table: table.to_string(),
            message: e.to_string(),
        })?;

    Ok(object
        .into_iter()
        .map(|(key, value)| match value {
            Value::String(payload) => HistoryRecord::with_payload(key, payload),
            _ => HistoryRecord::key_only(key),
        })
        .collect())
}

impl HistoryStorage for FileHistory {
    fn read_all(&self, table: &str) -> StorageResult<Vec<HistoryRecord>> {
        let content = match fs::read_to_string(self.path(table)) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        decode(table, &content)
    }

    fn insert_many(&self, table: &str, records: &[HistoryRecord]) -> StorageResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let fragment = encode_fragment(records)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(table))?;
        file.write_all(fragment.as_bytes())?;
        Ok(records.len())
    }

    fn replace_all(&self, table: &str, records: &[HistoryRecord]) -> StorageResult<usize> {
        let fragment = encode_fragment(records)?;
        fs::write(self.path(table), fragment.as_bytes())?;
        Ok(records.len())
    }

    fn is_append_only(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_table_is_empty() {
        let dir = TempDir::new().unwrap();
        let backend = FileHistory::new(dir.path()).unwrap();

        assert!(backend.read_all("history__y__nothing").unwrap().is_empty());
    }

    #[test]
    fn test_appends_accumulate() {
        let dir = TempDir::new().unwrap();
        let backend = FileHistory::new(dir.path()).unwrap();

        backend
            .insert_many("t", &[HistoryRecord::key_only("a"), HistoryRecord::key_only("b")])
            .unwrap();
        backend.insert_many("t", &[HistoryRecord::key_only("c")]).unwrap();

        let mut keys: Vec<_> = backend
            .read_all("t")
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["a", "b", "c"]);

        let raw = fs::read_to_string(dir.path().join("t")).unwrap();
        assert!(raw.starts_with(",\""));
    }

    #[test]
    fn test_replace_all_with_payloads() {
        let dir = TempDir::new().unwrap();
        let backend = FileHistory::new(dir.path()).unwrap();

        backend.insert_many("f", &[HistoryRecord::key_only("old")]).unwrap();
        backend
            .replace_all("f", &[HistoryRecord::with_payload("k", "{\"url\":\"x\"}")])
            .unwrap();

        let records = backend.read_all("f").unwrap();
        assert_eq!(records, vec![HistoryRecord::with_payload("k", "{\"url\":\"x\"}")]);

        backend.replace_all("f", &[]).unwrap();
        assert!(backend.read_all("f").unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let backend = FileHistory::new(dir.path()).unwrap();
        fs::write(dir.path().join("bad"), ",\"a\":").unwrap();

        assert!(matches!(
            backend.read_all("bad"),
            Err(StorageError::Corrupt { .. })
        ));
    }
}
