//! In-memory vector indices.
//!
//! Each browsing context (frame) gets two parallel brute-force cosine
//! indices: a 384-d store over query-text embeddings and a 768-d store
//! over HTML-fragment embeddings. Vectors are L2-normalised on insert so
//! cosine similarity reduces to an inner product. A pool retains at most
//! N frame indices and evicts the least recently used.

mod index;

pub use index::{FrameIndex, FrameIndexPool, SearchHit, VectorMeta, VectorStore};

/// Dimension of query-text embeddings.
pub const MINI_DIM: usize = 384;

/// Dimension of HTML-fragment embeddings.
pub const HTML_DIM: usize = 768;
