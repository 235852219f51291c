//! Promotion store.
//!
//! Remembers successful `(page, frame, label) → selector` mappings so
//! repeat lookups can skip matching entirely. Counters are monotonic and
//! every `(page_sig, frame_hash, label_key, selector)` row is unique.

use crate::error::Result;
use crate::store::kv::{now, SqliteStore};
use rusqlite::{params, OptionalExtension};
use tracing::debug;

/// Deterministic label key for promotions, insensitive to token order and
/// case.
///
/// `["Send", "message"]` becomes `"label:message|send"`.
pub fn label_key<I, S>(tokens: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut toks: Vec<String> = tokens
        .into_iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    toks.sort();
    toks.dedup();
    format!("label:{}", toks.join("|"))
}

/// Persistent promotion store over the shared database.
#[derive(Clone)]
pub struct PromotionStore {
    store: SqliteStore,
}

impl PromotionStore {
    /// Create a promotion store over the shared store.
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }

    /// Best promoted selector for this page/frame/label, if any.
    ///
    /// Rows are ranked by success count, then fewer failures, then
    /// recency. A best row that never succeeded is treated as absent.
    /// Lookup is a pure read.
    pub fn lookup(
        &self,
        page_sig: &str,
        frame_hash: &str,
        label_key: &str,
    ) -> Result<Option<String>> {
        if page_sig.is_empty() || frame_hash.is_empty() || label_key.is_empty() {
            return Ok(None);
        }

        let row: Option<(String, i64)> = self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT selector, success_count FROM promotions
                 WHERE page_sig = ?1 AND frame_hash = ?2 AND label_key = ?3
                 ORDER BY success_count DESC, failure_count ASC, updated_at DESC
                 LIMIT 1",
                params![page_sig, frame_hash, label_key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
        })?;

        Ok(match row {
            Some((selector, success_count)) if success_count > 0 => {
                debug!(page_sig, label_key, %selector, "promotion hit");
                Some(selector)
            }
            _ => None,
        })
    }

    /// Record a success or failure for a selector, creating the row on
    /// first sight.
    ///
    /// Counters only ever increase; `updated_at` never goes backwards.
    pub fn record(
        &self,
        page_sig: &str,
        frame_hash: &str,
        label_key: &str,
        selector: &str,
        success: bool,
    ) -> Result<()> {
        let ts = now();
        let (success_inc, failure_inc) = if success { (1, 0) } else { (0, 1) };

        self.store.with_conn(|conn| {
            conn.execute(
                "INSERT INTO promotions
                     (page_sig, frame_hash, label_key, selector,
                      success_count, failure_count, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(page_sig, frame_hash, label_key, selector) DO UPDATE SET
                     success_count = success_count + ?5,
                     failure_count = failure_count + ?6,
                     updated_at = MAX(updated_at, excluded.updated_at)",
                params![
                    page_sig,
                    frame_hash,
                    label_key,
                    selector,
                    success_inc,
                    failure_inc,
                    ts
                ],
            )?;
            Ok(())
        })
    }

    /// Counters for one row: `(success_count, failure_count, updated_at)`.
    pub fn counters(
        &self,
        page_sig: &str,
        frame_hash: &str,
        label_key: &str,
        selector: &str,
    ) -> Result<Option<(i64, i64, i64)>> {
        self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT success_count, failure_count, updated_at FROM promotions
                 WHERE page_sig = ?1 AND frame_hash = ?2 AND label_key = ?3 AND selector = ?4",
                params![page_sig, frame_hash, label_key, selector],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> PromotionStore {
        PromotionStore::new(SqliteStore::in_memory().unwrap())
    }

    #[test]
    fn test_label_key_order_and_case_insensitive() {
        assert_eq!(
            label_key(["Send", "message"]),
            label_key(["message", "SEND"])
        );
        assert_eq!(label_key(["Send", "message"]), "label:message|send");
    }

    #[test]
    fn test_label_key_skips_blank_tokens() {
        assert_eq!(label_key(["", "  ", "ok"]), "label:ok");
    }

    #[test]
    fn test_record_then_lookup() {
        let store = store();
        store
            .record("page", "frame", "label:submit", "//button[1]", true)
            .unwrap();

        let selector = store.lookup("page", "frame", "label:submit").unwrap();
        assert_eq!(selector.as_deref(), Some("//button[1]"));
    }

    #[test]
    fn test_lookup_prefers_more_successful_selector() {
        let store = store();
        for _ in 0..3 {
            store.record("p", "f", "label:save", "//button[2]", true).unwrap();
        }
        store.record("p", "f", "label:save", "//button[1]", true).unwrap();

        assert_eq!(
            store.lookup("p", "f", "label:save").unwrap().as_deref(),
            Some("//button[2]")
        );
    }

    #[test]
    fn test_lookup_ignores_rows_without_success() {
        let store = store();
        store.record("p", "f", "label:x", "//a[1]", false).unwrap();
        assert!(store.lookup("p", "f", "label:x").unwrap().is_none());

        store.record("p", "f", "label:x", "//a[1]", true).unwrap();
        assert!(store.lookup("p", "f", "label:x").unwrap().is_some());
    }

    #[test]
    fn test_lookup_is_pure_read() {
        let store = store();
        store.record("p", "f", "label:x", "//a[1]", true).unwrap();

        store.lookup("p", "f", "label:x").unwrap();
        store.lookup("p", "f", "label:x").unwrap();

        let (sc, fc, _) = store.counters("p", "f", "label:x", "//a[1]").unwrap().unwrap();
        assert_eq!((sc, fc), (1, 0));
    }

    #[test]
    fn test_counters_monotonic() {
        let store = store();
        store.record("p", "f", "label:x", "//a[1]", true).unwrap();
        let (sc1, fc1, ts1) = store.counters("p", "f", "label:x", "//a[1]").unwrap().unwrap();

        store.record("p", "f", "label:x", "//a[1]", false).unwrap();
        let (sc2, fc2, ts2) = store.counters("p", "f", "label:x", "//a[1]").unwrap().unwrap();

        assert_eq!(sc2, sc1);
        assert_eq!(fc2, fc1 + 1);
        assert!(ts2 >= ts1);
    }

    #[test]
    fn test_rows_unique_per_selector() {
        let store = store();
        store.record("p", "f", "label:x", "//a[1]", true).unwrap();
        store.record("p", "f", "label:x", "//a[1]", true).unwrap();

        let (sc, _, _) = store.counters("p", "f", "label:x", "//a[1]").unwrap().unwrap();
        assert_eq!(sc, 2);
    }

    #[test]
    fn test_mode_scoped_keys_do_not_collide() {
        let store = store();
        store
            .record("p", "f", "no-semantic:label:x", "//a[1]", true)
            .unwrap();

        assert!(store.lookup("p", "f", "label:x").unwrap().is_none());
        assert!(store
            .lookup("p", "f", "no-semantic:label:x")
            .unwrap()
            .is_some());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn label_key_insensitive_to_order_and_case(
                tokens in proptest::collection::vec("[a-zA-Z]{1,10}", 1..6),
            ) {
                let reversed: Vec<String> = tokens.iter().rev().cloned().collect();
                let upper: Vec<String> = tokens.iter().map(|t| t.to_uppercase()).collect();

                let base = label_key(&tokens);
                prop_assert_eq!(&base, &label_key(&reversed));
                prop_assert_eq!(&base, &label_key(&upper));
                prop_assert!(base.starts_with("label:"));
            }
        }
    }

    #[test]
    fn test_empty_key_components_return_none() {
        let store = store();
        assert!(store.lookup("", "f", "label:x").unwrap().is_none());
        assert!(store.lookup("p", "", "label:x").unwrap().is_none());
        assert!(store.lookup("p", "f", "").unwrap().is_none());
    }
}
