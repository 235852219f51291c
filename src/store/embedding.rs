//! Persistent embedding cache.
//!
//! Rows are keyed by content hash and scoped by model name; vectors are
//! stored as JSON-encoded float lists. Bulk get/put are the primary API:
//! the pipeline embeds only the delta of hashes the cache does not hold.

use crate::error::{Error, Result};
use crate::store::kv::{now, SqliteStore};
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;
use tracing::debug;

/// Embedding cache over the shared store.
#[derive(Clone)]
pub struct EmbeddingCache {
    store: SqliteStore,
}

impl EmbeddingCache {
    /// Create a cache over the shared store.
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }

    /// Store one vector.
    pub fn put(&self, hash: &str, vector: &[f32], model_name: &str) -> Result<()> {
        let payload = serde_json::to_string(vector)?;
        let ts = now();
        self.store.with_conn(|conn| {
            conn.execute(
                "INSERT INTO embeddings (hash, vector, dim, model_name, hits, ts)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)
                 ON CONFLICT(hash) DO UPDATE SET
                     vector = excluded.vector,
                     dim = excluded.dim,
                     model_name = excluded.model_name,
                     ts = excluded.ts",
                params![hash, payload, vector.len() as i64, model_name, ts],
            )?;
            Ok(())
        })
    }

    /// Store many vectors in one transaction.
    pub fn put_batch(&self, entries: &[(String, Vec<f32>)], model_name: &str) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let ts = now();

        let mut payloads = Vec::with_capacity(entries.len());
        for (hash, vector) in entries {
            payloads.push((hash, serde_json::to_string(vector)?, vector.len() as i64));
        }

        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "INSERT INTO embeddings (hash, vector, dim, model_name, hits, ts)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)
                 ON CONFLICT(hash) DO UPDATE SET
                     vector = excluded.vector,
                     dim = excluded.dim,
                     model_name = excluded.model_name,
                     ts = excluded.ts",
            )?;
            for (hash, payload, dim) in &payloads {
                stmt.execute(params![hash, payload, dim, model_name, ts])?;
            }
            Ok(())
        })
    }

    /// Fetch one vector, bumping its hit counter.
    pub fn get(&self, hash: &str) -> Result<Option<Vec<f32>>> {
        let payload: Option<String> = self.store.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT vector FROM embeddings WHERE hash = ?1",
                    params![hash],
                    |row| row.get(0),
                )
                .optional()?;
            if row.is_some() {
                // Hit counting is best-effort.
                let _ = conn.execute(
                    "UPDATE embeddings SET hits = hits + 1 WHERE hash = ?1",
                    params![hash],
                );
            }
            Ok(row)
        })?;

        match payload {
            Some(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| Error::CacheCorruption(format!("embedding row holds invalid JSON: {e}"))),
            None => Ok(None),
        }
    }

    /// Fetch many vectors at once; missing hashes are omitted.
    ///
    /// Input hashes are de-duplicated preserving order; every returned row
    /// has its hit counter bumped.
    pub fn get_batch(&self, hashes: &[String]) -> Result<HashMap<String, Vec<f32>>> {
        let mut unique: Vec<&String> = Vec::new();
        for hash in hashes {
            if !unique.contains(&hash) {
                unique.push(hash);
            }
        }
        if unique.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = vec!["?"; unique.len()].join(",");
        let sql = format!("SELECT hash, vector FROM embeddings WHERE hash IN ({placeholders})");

        let rows: Vec<(String, String)> = self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let params_refs: Vec<&dyn rusqlite::ToSql> =
                unique.iter().map(|h| *h as &dyn rusqlite::ToSql).collect();
            let rows = stmt
                .query_map(params_refs.as_slice(), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut bump = conn.prepare("UPDATE embeddings SET hits = hits + 1 WHERE hash = ?1")?;
            for (hash, _) in &rows {
                let _ = bump.execute(params![hash]);
            }
            Ok(rows)
        })?;

        let mut out = HashMap::with_capacity(rows.len());
        for (hash, payload) in rows {
            let vector: Vec<f32> = serde_json::from_str(&payload).map_err(|e| {
                Error::CacheCorruption(format!("embedding row '{hash}' holds invalid JSON: {e}"))
            })?;
            out.insert(hash, vector);
        }

        debug!(requested = unique.len(), found = out.len(), "embedding cache batch get");
        Ok(out)
    }

    /// Hit count for one row, when present.
    pub fn hits(&self, hash: &str) -> Result<Option<i64>> {
        self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT hits FROM embeddings WHERE hash = ?1",
                params![hash],
                |row| row.get(0),
            )
            .optional()
        })
    }

    /// Number of cached vectors per model.
    pub fn count_for_model(&self, model_name: &str) -> Result<i64> {
        self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM embeddings WHERE model_name = ?1",
                params![model_name],
                |row| row.get(0),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> EmbeddingCache {
        EmbeddingCache::new(SqliteStore::in_memory().unwrap())
    }

    #[test]
    fn test_put_get_roundtrip() {
        let cache = cache();
        cache.put("h1", &[0.1, 0.2, 0.3], "minilm").unwrap();

        let vector = cache.get("h1").unwrap().unwrap();
        assert_eq!(vector.len(), 3);
        assert!((vector[1] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_get_bumps_hits() {
        let cache = cache();
        cache.put("h1", &[1.0], "minilm").unwrap();

        cache.get("h1").unwrap();
        cache.get("h1").unwrap();
        assert_eq!(cache.hits("h1").unwrap(), Some(2));
    }

    #[test]
    fn test_batch_get_omits_missing_and_dedups() {
        let cache = cache();
        cache.put("a", &[1.0], "minilm").unwrap();
        cache.put("b", &[2.0], "minilm").unwrap();

        let found = cache
            .get_batch(&[
                "a".to_string(),
                "missing".to_string(),
                "a".to_string(),
                "b".to_string(),
            ])
            .unwrap();

        assert_eq!(found.len(), 2);
        assert!(found.contains_key("a"));
        assert!(!found.contains_key("missing"));
        // De-duplicated lookup bumps each found row once.
        assert_eq!(cache.hits("a").unwrap(), Some(1));
    }

    #[test]
    fn test_put_batch() {
        let cache = cache();
        cache
            .put_batch(
                &[("x".to_string(), vec![1.0]), ("y".to_string(), vec![2.0, 3.0])],
                "markuplm",
            )
            .unwrap();

        assert_eq!(cache.count_for_model("markuplm").unwrap(), 2);
        assert_eq!(cache.get("y").unwrap().unwrap().len(), 2);
    }

    #[test]
    fn test_rows_scoped_by_model() {
        let cache = cache();
        cache.put("h-mini", &[1.0], "minilm").unwrap();
        cache.put("h-markup", &[1.0], "markuplm").unwrap();

        assert_eq!(cache.count_for_model("minilm").unwrap(), 1);
        assert_eq!(cache.count_for_model("markuplm").unwrap(), 1);
    }
}
