//! Persistent SQLite-backed stores.
//!
//! One on-disk database holds three logical tables: a general `kv` table
//! for odd metadata, the embedding cache, and the promotion table that
//! short-circuits matching on re-visits. All access goes through a single
//! connection per process behind a mutex; WAL journalling keeps concurrent
//! reads cheap.

mod embedding;
mod kv;
mod promotion;
mod schema;

pub use embedding::EmbeddingCache;
pub use kv::SqliteStore;
pub use promotion::{label_key, PromotionStore};
pub use schema::{get_schema_version, initialize_schema, is_initialized, SCHEMA_VERSION};
