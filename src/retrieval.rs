//! Two-stage hybrid retrieval (semantic mode).
//!
//! Stage one shortlists nodes by cosine similarity between the query and
//! per-node text embeddings (384-d). Stage two reranks at most five
//! shortlisted nodes with HTML-aware embeddings (768-d) computed over
//! their hierarchy fragments. Scores fuse with the intent heuristics
//! unless the rerank margin is decisive.
//!
//! Every embedding is cached by content hash; only the delta is sent to
//! the embedder.

use crate::descriptor::{Candidate, CanonicalNode};
use crate::embedder::{content_hash, Embedder};
use crate::error::Result;
use crate::hierarchy::HtmlContextBuilder;
use crate::intent::{Action, ParsedIntent};
use crate::rerank::Reranker;
use crate::store::EmbeddingCache;
use crate::vector::{FrameIndexPool, SearchHit, VectorMeta};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Hard cap on stage-two candidates (the HTML scorer's input budget).
pub const RERANK_CAP: usize = 5;

/// Non-interactive nodes padded into a click shortlist.
const CLICK_PAD: usize = 5;

/// When the top-two rerank scores differ by at least this much, the
/// rerank ordering is trusted as-is.
const RERANK_MARGIN: f64 = 0.1;

/// Shortlist size for a requested `top_k`.
pub fn shortlist_size(top_k: usize) -> usize {
    (3 * top_k).max(20)
}

/// Two-stage retriever over per-frame vector indices.
pub struct HybridRetriever {
    embedder: Arc<dyn Embedder>,
    cache: EmbeddingCache,
    pool: Mutex<FrameIndexPool>,
    context_builder: HtmlContextBuilder,
}

impl HybridRetriever {
    /// Create a retriever.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        cache: EmbeddingCache,
        max_frame_indices: usize,
    ) -> Self {
        Self {
            embedder,
            cache,
            pool: Mutex::new(FrameIndexPool::new(max_frame_indices)),
            context_builder: HtmlContextBuilder::new(),
        }
    }

    /// Retrieve candidates for an intent over a canonicalised snapshot.
    ///
    /// `nodes` must be the node list the frame index was built from; a
    /// changed DOM must present a changed `frame_hash`.
    pub async fn retrieve(
        &self,
        intent: &ParsedIntent,
        nodes: &[CanonicalNode],
        frame_hash: &str,
        top_k: usize,
        reranker: &Reranker,
    ) -> Result<Vec<Candidate>> {
        if nodes.is_empty() {
            return Ok(Vec::new());
        }

        self.index_frame(nodes, frame_hash).await?;

        // Stage one: text shortlist.
        let query = if intent.target.is_empty() {
            intent.raw_step.clone()
        } else {
            intent.target.clone()
        };
        let query_vec = self.cached_text_embedding(&query).await?;

        let k1 = shortlist_size(top_k);
        let mut hits = {
            let mut pool = self.lock_pool();
            pool.get_or_create(frame_hash).mini.search(&query_vec, k1)
        };

        if intent.action == Action::Click {
            hits = prefer_interactive(hits, CLICK_PAD);
        }
        hits.truncate(RERANK_CAP);

        if hits.is_empty() {
            return Ok(Vec::new());
        }

        // Stage two: HTML rerank over the shortlist.
        let shortlist: Vec<&CanonicalNode> = hits
            .iter()
            .filter_map(|hit| nodes.get(hit.meta.node_index))
            .collect();

        let fragments: Vec<String> = shortlist
            .iter()
            .map(|node| self.context_builder.build(node, nodes).html)
            .collect();
        let fragment_vecs = self.cached_html_embeddings(&fragments).await?;

        {
            let mut pool = self.lock_pool();
            let index = pool.get_or_create(frame_hash);
            for (hit, vector) in hits.iter().zip(&fragment_vecs) {
                index.html.upsert(vector.clone(), hit.meta.clone())?;
            }
        }

        let query_wrapper = action_query_wrapper(intent);
        let query_html_vec = self.cached_html_embedding(&query_wrapper).await?;

        let mut candidates: Vec<Candidate> = shortlist
            .iter()
            .zip(&fragment_vecs)
            .map(|(node, vector)| {
                let score = cosine(&query_html_vec, vector) as f64;
                Candidate::new((*node).clone(), score, format!("markup_cosine={:.3}", score))
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.base_score
                .partial_cmp(&a.base_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        // A decisive rerank margin is trusted as-is; otherwise fuse with
        // the intent heuristics.
        let decisive = candidates.len() >= 2
            && candidates[0].base_score - candidates[1].base_score >= RERANK_MARGIN;
        debug!(
            shortlist = shortlist.len(),
            decisive, "hybrid retrieval reranked candidates"
        );

        if decisive || candidates.len() < 2 {
            Ok(candidates)
        } else {
            Ok(reranker.rerank(candidates, intent))
        }
    }

    /// Populate the frame's text index once per frame hash.
    async fn index_frame(&self, nodes: &[CanonicalNode], frame_hash: &str) -> Result<()> {
        {
            let mut pool = self.lock_pool();
            if !pool.get_or_create(frame_hash).mini.is_empty() {
                return Ok(());
            }
        }

        let texts: Vec<String> = nodes.iter().map(CanonicalNode::text_repr).collect();
        let model = self.embedder.text_model_name().to_string();
        let hashes: Vec<String> = texts.iter().map(|t| content_hash(&model, t)).collect();

        let mut found = self.cache.get_batch(&hashes)?;

        // Embed only the delta the cache does not hold.
        let mut missing_texts = Vec::new();
        let mut missing_hashes = Vec::new();
        for (text, hash) in texts.iter().zip(&hashes) {
            if !found.contains_key(hash) && !missing_hashes.contains(hash) {
                missing_texts.push(text.clone());
                missing_hashes.push(hash.clone());
            }
        }

        if !missing_texts.is_empty() {
            let vectors = self.embedder.embed_text_batch(&missing_texts).await?;
            let entries: Vec<(String, Vec<f32>)> = missing_hashes
                .iter()
                .cloned()
                .zip(vectors.iter().cloned())
                .collect();
            self.cache.put_batch(&entries, &model)?;
            for (hash, vector) in entries {
                found.insert(hash, vector);
            }
        }

        let mut pool = self.lock_pool();
        let index = pool.get_or_create(frame_hash);
        for (i, (node, hash)) in nodes.iter().zip(&hashes).enumerate() {
            if let Some(vector) = found.get(hash) {
                index.mini.upsert(
                    vector.clone(),
                    VectorMeta {
                        node_index: i,
                        signature: node.signature.clone(),
                        is_interactive: node.is_interactive,
                    },
                )?;
            }
        }
        debug!(frame = frame_hash, nodes = nodes.len(), "frame index built");
        Ok(())
    }

    async fn cached_text_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let model = self.embedder.text_model_name().to_string();
        let hash = content_hash(&model, text);
        if let Some(vector) = self.cache.get(&hash)? {
            return Ok(vector);
        }
        let vector = self.embedder.embed_text(text).await?;
        self.cache.put(&hash, &vector, &model)?;
        Ok(vector)
    }

    async fn cached_html_embedding(&self, html: &str) -> Result<Vec<f32>> {
        let model = self.embedder.html_model_name().to_string();
        let hash = content_hash(&model, html);
        if let Some(vector) = self.cache.get(&hash)? {
            return Ok(vector);
        }
        let vector = self.embedder.embed_html(html).await?;
        self.cache.put(&hash, &vector, &model)?;
        Ok(vector)
    }

    async fn cached_html_embeddings(&self, htmls: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self.embedder.html_model_name().to_string();
        let hashes: Vec<String> = htmls.iter().map(|h| content_hash(&model, h)).collect();
        let mut found = self.cache.get_batch(&hashes)?;

        let mut missing = Vec::new();
        let mut missing_hashes = Vec::new();
        for (html, hash) in htmls.iter().zip(&hashes) {
            if !found.contains_key(hash) && !missing_hashes.contains(hash) {
                missing.push(html.clone());
                missing_hashes.push(hash.clone());
            }
        }

        if !missing.is_empty() {
            let vectors = self.embedder.embed_html_batch(&missing).await?;
            let entries: Vec<(String, Vec<f32>)> = missing_hashes
                .iter()
                .cloned()
                .zip(vectors.iter().cloned())
                .collect();
            self.cache.put_batch(&entries, &model)?;
            for (hash, vector) in entries {
                found.insert(hash, vector);
            }
        }

        Ok(hashes
            .iter()
            .map(|hash| found.get(hash).cloned().unwrap_or_default())
            .collect())
    }

    /// Drop the retained index for a frame.
    pub fn reset_frame(&self, frame_hash: &str) {
        self.lock_pool().reset(frame_hash);
    }

    /// Approximate memory held by retained frame indices, in bytes.
    pub fn index_memory_bytes(&self) -> usize {
        self.lock_pool().memory_bytes()
    }

    fn lock_pool(&self) -> std::sync::MutexGuard<'_, FrameIndexPool> {
        self.pool.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Wrap the query so its HTML embedding lives in the same distribution as
/// element fragments. The wrapper tag reflects the action.
pub fn action_query_wrapper(intent: &ParsedIntent) -> String {
    let target = &intent.target;
    match intent.action {
        Action::Click => {
            let step = intent.raw_step.to_lowercase();
            if step.contains("select") || step.contains("choose") || step.contains("pick") {
                format!("<select name=\"{}\"></select>", target)
            } else {
                format!("<button>{}</button>", target)
            }
        }
        Action::Type => format!("<input placeholder=\"{}\">", target),
        _ => format!("<div>{}</div>", target),
    }
}

/// Partition hits interactive-first, padding with up to `pad`
/// non-interactive fallbacks.
fn prefer_interactive(hits: Vec<SearchHit>, pad: usize) -> Vec<SearchHit> {
    let (interactive, other): (Vec<_>, Vec<_>) =
        hits.into_iter().partition(|h| h.meta.is_interactive);

    let mut out = interactive;
    out.extend(other.into_iter().take(pad));
    out
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na < 1e-12 || nb < 1e-12 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::CanonicalBuilder;
    use crate::embedder::HashEmbedder;
    use crate::intent::IntentParser;
    use crate::snapshot::{RawNode, Snapshot};
    use crate::store::SqliteStore;

    fn retriever() -> HybridRetriever {
        HybridRetriever::new(
            Arc::new(HashEmbedder::new()),
            EmbeddingCache::new(SqliteStore::in_memory().unwrap()),
            10,
        )
    }

    fn nodes_from(elements: Vec<RawNode>) -> Vec<CanonicalNode> {
        let snapshot = Snapshot::new("https://example.com", "dom", "frame", elements);
        CanonicalBuilder::new().build_all(&snapshot)
    }

    #[test]
    fn test_shortlist_size_floor() {
        assert_eq!(shortlist_size(1), 20);
        assert_eq!(shortlist_size(5), 20);
        assert_eq!(shortlist_size(10), 30);
    }

    #[test]
    fn test_action_query_wrappers() {
        let parser = IntentParser::new();
        assert_eq!(
            action_query_wrapper(&parser.parse("Click \"Go\"")),
            "<button>Go</button>"
        );
        assert_eq!(
            action_query_wrapper(&parser.parse("Type $\"x\" into \"User\"")),
            "<input placeholder=\"User\">"
        );
        assert_eq!(
            action_query_wrapper(&parser.parse("Validate \"Done\"")),
            "<div>Done</div>"
        );
        assert_eq!(
            action_query_wrapper(&parser.parse("Select \"Red\"")),
            "<select name=\"Red\"></select>"
        );
    }

    #[test]
    fn test_prefer_interactive_partition() {
        let hit = |i: usize, interactive: bool, score: f32| SearchHit {
            score,
            meta: VectorMeta {
                node_index: i,
                signature: format!("s{i}"),
                is_interactive: interactive,
            },
        };

        let hits = vec![
            hit(0, false, 0.9),
            hit(1, true, 0.8),
            hit(2, false, 0.7),
            hit(3, true, 0.6),
        ];
        let out = prefer_interactive(hits, 1);

        assert_eq!(out[0].meta.node_index, 1);
        assert_eq!(out[1].meta.node_index, 3);
        // Only one non-interactive pad survives.
        assert_eq!(out.len(), 3);
        assert_eq!(out[2].meta.node_index, 0);
    }

    #[tokio::test]
    async fn test_retrieve_returns_scored_candidates() {
        let retriever = retriever();
        let nodes = nodes_from(vec![
            RawNode::new("BUTTON", "Login").with_backend_id(1),
            RawNode::new("BUTTON", "Cancel").with_backend_id(2),
            RawNode::new("P", "Welcome to the site").with_backend_id(3),
        ]);

        let intent = IntentParser::new().parse("Click \"Login\"");
        let candidates = retriever
            .retrieve(&intent, &nodes, "frame-a", 20, &Reranker::new())
            .await
            .unwrap();

        assert!(!candidates.is_empty());
        assert!(candidates.len() <= RERANK_CAP);
        assert!(candidates[0]
            .reasons
            .iter()
            .any(|r| r.starts_with("markup_cosine=")));
    }

    #[tokio::test]
    async fn test_rerank_cap_respected() {
        let retriever = retriever();
        let elements: Vec<RawNode> = (0..30)
            .map(|i| RawNode::new("BUTTON", format!("Item {i}")).with_backend_id(i))
            .collect();
        let nodes = nodes_from(elements);

        let intent = IntentParser::new().parse("Click \"Item 7\"");
        let candidates = retriever
            .retrieve(&intent, &nodes, "frame-b", 20, &Reranker::new())
            .await
            .unwrap();

        assert!(candidates.len() <= RERANK_CAP);
    }

    #[tokio::test]
    async fn test_embeddings_cached_across_calls() {
        let store = SqliteStore::in_memory().unwrap();
        let cache = EmbeddingCache::new(store);
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new());
        let retriever = HybridRetriever::new(embedder.clone(), cache.clone(), 10);

        let nodes = nodes_from(vec![RawNode::new("BUTTON", "Login").with_backend_id(1)]);
        let intent = IntentParser::new().parse("Click \"Login\"");

        retriever
            .retrieve(&intent, &nodes, "frame-a", 20, &Reranker::new())
            .await
            .unwrap();
        let count_after_first = cache.count_for_model(embedder.text_model_name()).unwrap();

        // Second call over the same frame reuses both index and cache.
        retriever
            .retrieve(&intent, &nodes, "frame-a", 20, &Reranker::new())
            .await
            .unwrap();
        let count_after_second = cache.count_for_model(embedder.text_model_name()).unwrap();

        assert_eq!(count_after_first, count_after_second);
    }

    #[tokio::test]
    async fn test_empty_nodes_yield_no_candidates() {
        let retriever = retriever();
        let intent = IntentParser::new().parse("Click \"Login\"");
        let candidates = retriever
            .retrieve(&intent, &[], "frame-x", 20, &Reranker::new())
            .await
            .unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_cosine_bounds() {
        assert!((cosine(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine(&[], &[]), 0.0);
    }
}
