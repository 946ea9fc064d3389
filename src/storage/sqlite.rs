//! SQLite history backend
//!
//! This module provides the relational implementation of `HistoryStorage`.

use crate::storage::schema::{initialize_history_table, table_exists};
use crate::storage::traits::{HistoryRecord, HistoryStorage, StorageResult};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::path::Path;

/// SQLite history backend
///
/// One connection is shared by every spider run. Tables already created are
/// remembered in `tables` so repeated flushes skip the schema round trip.
pub struct SqliteHistory {
    conn: Mutex<Connection>,
    tables: RwLock<HashSet<String>>,
}

impl SqliteHistory {
    /// Opens or creates the database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        Ok(Self::from_connection(conn))
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> StorageResult<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            tables: RwLock::new(HashSet::new()),
        }
    }

    fn is_known(&self, table: &str) -> bool {
        self.tables.read().contains(table)
    }

    fn ensure_table(&self, conn: &Connection, table: &str) -> StorageResult<()> {
        if self.is_known(table) {
            return Ok(());
        }
        initialize_history_table(conn, table)?;
        self.tables.write().insert(table.to_string());
        Ok(())
    }
}

fn insert_all(tx: &rusqlite::Transaction<'_>, table: &str, records: &[HistoryRecord]) -> StorageResult<usize> {
    let now = Utc::now().to_rfc3339();
    let mut stmt = tx.prepare(&format!(
        r#"INSERT OR REPLACE INTO "{table}" (id, failure, created_at) VALUES (?1, ?2, ?3)"#
    ))?;
    for record in records {
        stmt.execute(params![record.key, record.payload, now])?;
    }
    Ok(records.len())
}

impl HistoryStorage for SqliteHistory {
    fn read_all(&self, table: &str) -> StorageResult<Vec<HistoryRecord>> {
        let conn = self.conn.lock();
        if !self.is_known(table) && !table_exists(&conn, table)? {
            return Ok(Vec::new());
        }

        let mut stmt = conn.prepare(&format!(r#"SELECT id, failure FROM "{table}""#))?;
        let records = stmt
            .query_map([], |row| {
                Ok(HistoryRecord {
                    key: row.get(0)?,
                    payload: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn insert_many(&self, table: &str, records: &[HistoryRecord]) -> StorageResult<usize> {
        let mut conn = self.conn.lock();
        self.ensure_table(&conn, table)?;

        let tx = conn.transaction()?;
        let written = insert_all(&tx, table, records)?;
        tx.commit()?;
        Ok(written)
    }

    fn replace_all(&self, table: &str, records: &[HistoryRecord]) -> StorageResult<usize> {
        let mut conn = self.conn.lock();
        self.ensure_table(&conn, table)?;

        let tx = conn.transaction()?;
        tx.execute(&format!(r#"DELETE FROM "{table}""#), [])?;
        let written = insert_all(&tx, table, records)?;
        tx.commit()?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_in_memory() {
        let storage = SqliteHistory::new_in_memory();
        assert!(storage.is_ok());
    }

    #[test]
    fn test_read_unknown_table() {
        let storage = SqliteHistory::new_in_memory().unwrap();
        assert!(storage.read_all("history__y__none").unwrap().is_empty());
    }

    #[test]
    fn test_insert_and_read() {
        let storage = SqliteHistory::new_in_memory().unwrap();
        storage
            .insert_many(
                "history__y__demo",
                &[HistoryRecord::key_only("a"), HistoryRecord::key_only("b")],
            )
            .unwrap();
        // Same key again is not duplicated
        storage
            .insert_many("history__y__demo", &[HistoryRecord::key_only("a")])
            .unwrap();

        let mut keys: Vec<_> = storage
            .read_all("history__y__demo")
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_replace_all_drops_previous_rows() {
        let storage = SqliteHistory::new_in_memory().unwrap();
        storage
            .insert_many("history__n__demo", &[HistoryRecord::with_payload("a", "{}")])
            .unwrap();
        storage
            .replace_all("history__n__demo", &[HistoryRecord::with_payload("b", "{\"x\":1}")])
            .unwrap();

        let records = storage.read_all("history__n__demo").unwrap();
        assert_eq!(records, vec![HistoryRecord::with_payload("b", "{\"x\":1}")]);
    }

    #[test]
    fn test_file_database_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("history.db");
        {
            let storage = SqliteHistory::new(&path).unwrap();
            storage
                .insert_many("history__y__demo", &[HistoryRecord::key_only("k")])
                .unwrap();
        }

        let reopened = SqliteHistory::new(&path).unwrap();
        assert_eq!(reopened.read_all("history__y__demo").unwrap().len(), 1);
    }
}
