//! Brute-force cosine stores and the per-frame index pool.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use super::{HTML_DIM, MINI_DIM};

/// Metadata attached to each stored vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMeta {
    /// Index of the node in the step's canonical node list
    pub node_index: usize,
    /// Canonical signature of the node
    pub signature: String,
    /// Whether the node is interactive
    pub is_interactive: bool,
}

/// One nearest-neighbour result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Cosine similarity with the query
    pub score: f32,
    /// Metadata of the stored vector
    pub meta: VectorMeta,
}

/// Append-only brute-force cosine store.
///
/// Upserts do not deduplicate; candidate sets are at most a few thousand
/// vectors, so linear scans are fine.
#[derive(Debug, Clone)]
pub struct VectorStore {
    dim: usize,
    vectors: Vec<Vec<f32>>,
    meta: Vec<VectorMeta>,
}

impl VectorStore {
    /// Create a store for vectors of the given dimension.
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            vectors: Vec::new(),
            meta: Vec::new(),
        }
    }

    /// Append a vector with its metadata.
    ///
    /// The vector is L2-normalised before storage.
    pub fn upsert(&mut self, vector: Vec<f32>, meta: VectorMeta) -> Result<()> {
        if vector.len() != self.dim {
            return Err(Error::Internal(format!(
                "vector dimension {} does not match store dimension {}",
                vector.len(),
                self.dim
            )));
        }
        self.vectors.push(l2_normalize(vector));
        self.meta.push(meta);
        Ok(())
    }

    /// Top-k nearest neighbours of `query` by cosine similarity.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit> {
        if query.len() != self.dim || self.vectors.is_empty() || k == 0 {
            return Vec::new();
        }
        let query = l2_normalize(query.to_vec());

        let mut hits: Vec<SearchHit> = self
            .vectors
            .iter()
            .zip(&self.meta)
            .map(|(v, m)| SearchHit {
                score: dot(&query, v),
                meta: m.clone(),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.meta.node_index.cmp(&b.meta.node_index))
        });
        hits.truncate(k);
        hits
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Approximate memory held by vectors, in bytes.
    pub fn memory_bytes(&self) -> usize {
        self.vectors.len() * self.dim * std::mem::size_of::<f32>()
    }
}

/// The two parallel stores for one frame.
#[derive(Debug, Clone)]
pub struct FrameIndex {
    /// 384-d query-text store
    pub mini: VectorStore,
    /// 768-d HTML-fragment store
    pub html: VectorStore,
}

impl FrameIndex {
    fn new() -> Self {
        Self {
            mini: VectorStore::new(MINI_DIM),
            html: VectorStore::new(HTML_DIM),
        }
    }

    /// Approximate memory held by both stores, in bytes.
    pub fn memory_bytes(&self) -> usize {
        self.mini.memory_bytes() + self.html.memory_bytes()
    }
}

/// LRU pool of per-frame indices.
///
/// Eviction frees both stores and the associated metadata for the evicted
/// frame.
#[derive(Debug)]
pub struct FrameIndexPool {
    capacity: usize,
    frames: HashMap<String, (FrameIndex, u64)>,
    clock: u64,
}

impl FrameIndexPool {
    /// Create a pool retaining at most `capacity` frame indices.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            frames: HashMap::new(),
            clock: 0,
        }
    }

    /// Get or create the index for a frame, marking it most recently used.
    pub fn get_or_create(&mut self, frame_hash: &str) -> &mut FrameIndex {
        self.clock += 1;
        let clock = self.clock;

        if !self.frames.contains_key(frame_hash) {
            self.evict_if_full();
        }

        let entry = self
            .frames
            .entry(frame_hash.to_string())
            .or_insert_with(|| (FrameIndex::new(), clock));
        entry.1 = clock;
        &mut entry.0
    }

    /// Drop the index for a frame, e.g. when its hash changed.
    pub fn reset(&mut self, frame_hash: &str) {
        self.frames.remove(frame_hash);
    }

    /// Whether the pool currently holds an index for the frame.
    pub fn contains(&self, frame_hash: &str) -> bool {
        self.frames.contains_key(frame_hash)
    }

    /// Number of retained frame indices.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Approximate memory held across all frames, in bytes.
    pub fn memory_bytes(&self) -> usize {
        self.frames.values().map(|(f, _)| f.memory_bytes()).sum()
    }

    fn evict_if_full(&mut self) {
        while self.frames.len() >= self.capacity {
            let Some(oldest) = self
                .frames
                .iter()
                .min_by_key(|(_, (_, used))| *used)
                .map(|(k, _)| k.clone())
            else {
                return;
            };
            debug!(frame = %oldest, "evicting frame index");
            self.frames.remove(&oldest);
        }
    }
}

fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-12 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
