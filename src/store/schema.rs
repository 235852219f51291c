//! SQLite schema and migrations for the cache database.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
pub fn initialize_schema(conn: &Connection) -> SqliteResult<()> {
    // Page size must be set before any table exists to take effect.
    conn.pragma_update(None, "page_size", 4096)?;

    // WAL mode for cheap concurrent reads
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // Create schema version table
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    // Check current version
    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    // Apply migrations
    if current_version < 1 {
        apply_v1_schema(conn)?;
    }

    Ok(())
}

/// Apply version 1 schema.
fn apply_v1_schema(conn: &Connection) -> SqliteResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS kv (
            k TEXT PRIMARY KEY,
            v TEXT NOT NULL,
            ts INTEGER NOT NULL
        )",
        [],
    )?;

    // Vectors are stored as JSON-encoded float lists
    conn.execute(
        "CREATE TABLE IF NOT EXISTS embeddings (
            hash TEXT PRIMARY KEY,
            vector TEXT NOT NULL,
            dim INTEGER NOT NULL,
            model_name TEXT NOT NULL,
            hits INTEGER NOT NULL DEFAULT 0,
            ts INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS promotions (
            page_sig TEXT NOT NULL,
            frame_hash TEXT NOT NULL,
            label_key TEXT NOT NULL,
            selector TEXT NOT NULL,
            success_count INTEGER NOT NULL DEFAULT 0,
            failure_count INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (page_sig, frame_hash, label_key, selector)
        )",
        [],
    )?;

    // Indexes for common queries
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_embeddings_model ON embeddings(model_name)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_embeddings_ts ON embeddings(ts)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_promotions_label
         ON promotions(page_sig, frame_hash, label_key)",
        [],
    )?;

    // Record migration
    conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;

    Ok(())
}

/// Get the current schema version.
pub fn get_schema_version(conn: &Connection) -> SqliteResult<i32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
}

/// Check if the schema is initialized.
pub fn is_initialized(conn: &Connection) -> bool {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='promotions'",
        [],
        |row| row.get::<_, i32>(0),
    )
    .map(|count| count > 0)
    .unwrap_or(false)
}

/// Drop and recreate one cache table after corruption.
pub fn rebuild_table(conn: &Connection, table: &str) -> SqliteResult<()> {
    match table {
        "kv" => {
            conn.execute("DROP TABLE IF EXISTS kv", [])?;
            conn.execute(
                "CREATE TABLE kv (k TEXT PRIMARY KEY, v TEXT NOT NULL, ts INTEGER NOT NULL)",
                [],
            )?;
        }
        "embeddings" => {
            conn.execute("DROP TABLE IF EXISTS embeddings", [])?;
            conn.execute(
                "CREATE TABLE embeddings (
                    hash TEXT PRIMARY KEY,
                    vector TEXT NOT NULL,
                    dim INTEGER NOT NULL,
                    model_name TEXT NOT NULL,
                    hits INTEGER NOT NULL DEFAULT 0,
                    ts INTEGER NOT NULL
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX idx_embeddings_model ON embeddings(model_name)",
                [],
            )?;
            conn.execute("CREATE INDEX idx_embeddings_ts ON embeddings(ts)", [])?;
        }
        "promotions" => {
            conn.execute("DROP TABLE IF EXISTS promotions", [])?;
            conn.execute(
                "CREATE TABLE promotions (
                    page_sig TEXT NOT NULL,
                    frame_hash TEXT NOT NULL,
                    label_key TEXT NOT NULL,
                    selector TEXT NOT NULL,
                    success_count INTEGER NOT NULL DEFAULT 0,
                    failure_count INTEGER NOT NULL DEFAULT 0,
                    updated_at INTEGER NOT NULL,
                    PRIMARY KEY (page_sig, frame_hash, label_key, selector)
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX idx_promotions_label
                 ON promotions(page_sig, frame_hash, label_key)",
                [],
            )?;
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_schema() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        assert!(is_initialized(&conn));
        assert_eq!(get_schema_version(&conn).unwrap(), 1);
    }

    #[test]
    fn test_idempotent_initialization() {
        let conn = Connection::open_in_memory().unwrap();

        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), 1);
    }

    #[test]
    fn test_rebuild_table_clears_rows() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        conn.execute(
            "INSERT INTO kv (k, v, ts) VALUES ('a', '1', 0)",
            [],
        )
        .unwrap();
        rebuild_table(&conn, "kv").unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM kv", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_wal_mode() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        let mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .unwrap();
        // In-memory databases use "memory" mode, file databases use "wal".
        assert!(mode == "memory" || mode == "wal");
    }
}
