//! History table schema
//!
//! Every spider run gets its own success and failure tables, so the schema is
//! generated per table name rather than applied once at startup.

use rusqlite::Connection;

/// SQL for one history table
///
/// `id` is the request key; `failure` holds the serialized request for
/// failure tables and stays NULL for success tables.
pub fn history_table_sql(table: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS "{table}" (
    id TEXT NOT NULL PRIMARY KEY,
    failure TEXT,
    created_at TEXT NOT NULL
);
"#
    )
}

/// Creates `table` if it does not exist
pub fn initialize_history_table(conn: &Connection, table: &str) -> rusqlite::Result<()> {
    conn.execute_batch(&history_table_sql(table))
}

/// Returns true if `table` exists in the database
pub fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}
