//! Core SQLite store with the general key-value API.

use crate::error::{Error, Result};
use crate::store::schema::{initialize_schema, is_initialized, rebuild_table};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Shared SQLite store behind one connection per process.
///
/// Cloning is cheap; clones share the connection and lock.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
    max_size_bytes: u64,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>, max_size_mb: u64) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("failed to create cache dir: {e}")))?;
        }

        let conn = Connection::open(path).map_err(|e| Error::Storage(e.to_string()))?;
        if !is_initialized(&conn) {
            info!(path = %path.display(), "initialising cache database");
        }
        initialize_schema(&conn).map_err(|e| Error::Storage(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
            max_size_bytes: max_size_mb.max(32) * 1024 * 1024,
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Storage(e.to_string()))?;
        initialize_schema(&conn).map_err(|e| Error::Storage(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
            max_size_bytes: u64::MAX,
        })
    }

    /// Run a closure against the shared connection.
    pub(crate) fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("failed to lock connection: {e}")))?;
        f(&conn).map_err(map_sqlite_error)
    }

    /// Store a JSON value under a key.
    pub fn put(&self, key: &str, value: &Value) -> Result<()> {
        let payload = serde_json::to_string(value)?;
        let ts = now();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv (k, v, ts) VALUES (?1, ?2, ?3)
                 ON CONFLICT(k) DO UPDATE SET v = excluded.v, ts = excluded.ts",
                params![key, payload, ts],
            )?;
            Ok(())
        })
    }

    /// Fetch a JSON value by key.
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        let payload: Option<String> = self.with_conn(|conn| {
            conn.query_row("SELECT v FROM kv WHERE k = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
        })?;

        match payload {
            Some(text) => match serde_json::from_str(&text) {
                Ok(value) => Ok(Some(value)),
                Err(e) => Err(Error::CacheCorruption(format!(
                    "kv row '{key}' holds invalid JSON: {e}"
                ))),
            },
            None => Ok(None),
        }
    }

    /// VACUUM when the database file exceeds the soft size cap.
    pub fn vacuum_if_needed(&self) -> Result<bool> {
        let Some(path) = &self.path else {
            return Ok(false);
        };
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if size <= self.max_size_bytes {
            return Ok(false);
        }

        info!(size, cap = self.max_size_bytes, "vacuuming cache database");
        self.with_conn(|conn| conn.execute_batch("VACUUM"))?;
        Ok(true)
    }

    /// Rebuild one corrupted table, dropping its rows.
    ///
    /// Used by the corruption-recovery path; the step that hit the
    /// corruption proceeds with an empty table.
    pub fn rebuild(&self, table: &str) -> Result<()> {
        warn!(table, "rebuilding corrupted cache table");
        self.with_conn(|conn| rebuild_table(conn, table))
    }
}

/// Map SQLite failures onto the error taxonomy.
fn map_sqlite_error(e: rusqlite::Error) -> Error {
    let text = e.to_string();
    if text.contains("malformed") || text.contains("corrupt") || text.contains("not a database") {
        Error::CacheCorruption(text)
    } else {
        Error::Storage(text)
    }
}

/// Unix seconds.
pub(crate) fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
