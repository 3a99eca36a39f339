//! SQLite schema for the persisted reference graph.

use rusqlite::{params, Connection, OptionalExtension};

use crate::errors::EvidenceResult;

/// Bumped whenever the table layout below changes.
pub const GRAPH_SCHEMA_VERSION: i32 = 1;

pub const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS graph_meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS nodes (
        id INTEGER PRIMARY KEY,
        path TEXT NOT NULL UNIQUE,
        definition_count INTEGER NOT NULL,
        reference_count INTEGER NOT NULL,
        external_reference_count INTEGER NOT NULL,
        content_hash TEXT NOT NULL,
        importance REAL NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS edges (
        source_id INTEGER NOT NULL REFERENCES nodes(id),
        target_id INTEGER NOT NULL REFERENCES nodes(id),
        weight INTEGER NOT NULL,
        PRIMARY KEY (source_id, target_id)
    );",
    "CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_id);",
];

pub fn init_schema(conn: &Connection) -> EvidenceResult<()> {
    for stmt in SCHEMA_STATEMENTS {
        conn.execute_batch(stmt)?;
    }
    set_meta(conn, "schema_version", &GRAPH_SCHEMA_VERSION.to_string())?;
    Ok(())
}

pub fn set_meta(conn: &Connection, key: &str, value: &str) -> EvidenceResult<()> {
    conn.execute(
        "INSERT INTO graph_meta(key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        params![key, value],
    )?;
    Ok(())
}

pub fn get_meta(conn: &Connection, key: &str) -> EvidenceResult<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM graph_meta WHERE key = ?1;",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(
            get_meta(&conn, "schema_version").unwrap().as_deref(),
            Some("1")
        );
        assert_eq!(get_meta(&conn, "missing").unwrap(), None);
    }
}
