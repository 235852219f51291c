//! Embedding model seam.
//!
//! Two black-box encoders back hybrid retrieval: a small query-text model
//! (384-d) and an HTML-aware model (768-d). This module defines the trait
//! the pipeline consumes, content hashing for the persistent embedding
//! cache, a deterministic degraded-mode implementation, and an HTTP client
//! for a remote embedding service.
//!
//! Embedders must be deterministic for identical input; the embedding
//! cache relies on it.

mod http;

pub use http::{EmbedderConfig, HttpEmbedder};

use crate::error::Result;
use crate::vector::{HTML_DIM, MINI_DIM};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Text and HTML embedding provider.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Encode one query/text string (384-d).
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    /// Encode a batch of text strings.
    async fn embed_text_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Encode one HTML fragment (768-d).
    async fn embed_html(&self, html: &str) -> Result<Vec<f32>>;

    /// Encode a batch of HTML fragments.
    async fn embed_html_batch(&self, htmls: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Name of the text model, used to scope cache rows.
    fn text_model_name(&self) -> &str;

    /// Name of the HTML model, used to scope cache rows.
    fn html_model_name(&self) -> &str;
}

/// Content hash scoping a cache row to one model.
pub fn content_hash(model_name: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model_name.as_bytes());
    hasher.update(b":");
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Deterministic hash-based embedder.
///
/// Degraded-mode stand-in when model assets are unavailable: vectors are
/// derived purely from content digests, so identical inputs always embed
/// identically and caching behaves as with real models. Similarity
/// quality is sacrificed, not pipeline shape.
#[derive(Debug, Clone, Default)]
pub struct HashEmbedder;

impl HashEmbedder {
    /// Create a hash embedder.
    pub fn new() -> Self {
        Self
    }

    fn pseudo_vector(content: &str, dim: usize) -> Vec<f32> {
        let mut out = Vec::with_capacity(dim);
        let mut counter: u32 = 0;
        while out.len() < dim {
            let mut hasher = Sha256::new();
            hasher.update(content.as_bytes());
            hasher.update(counter.to_le_bytes());
            let digest = hasher.finalize();
            for chunk in digest.chunks(4) {
                if out.len() == dim {
                    break;
                }
                let bytes: [u8; 4] = chunk.try_into().unwrap_or([0; 4]);
                let raw = u32::from_le_bytes(bytes);
                // Map to [-1, 1].
                out.push((raw as f32 / u32::MAX as f32) * 2.0 - 1.0);
            }
            counter += 1;
        }
        out
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        Ok(Self::pseudo_vector(text, MINI_DIM))
    }

    async fn embed_text_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| Self::pseudo_vector(t, MINI_DIM))
            .collect())
    }

    async fn embed_html(&self, html: &str) -> Result<Vec<f32>> {
        Ok(Self::pseudo_vector(html, HTML_DIM))
    }

    async fn embed_html_batch(&self, htmls: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(htmls
            .iter()
            .map(|h| Self::pseudo_vector(h, HTML_DIM))
            .collect())
    }

    fn text_model_name(&self) -> &str {
        "hash-mini"
    }

    fn html_model_name(&self) -> &str {
        "hash-markup"
    }
}
