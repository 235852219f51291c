//! # her-core
//!
//! A deterministic element-retrieval engine for browser automation: given
//! a natural-language test step and a captured DOM snapshot, it returns a
//! stable relative XPath for the node the step refers to, together with
//! the action to perform.
//!
//! ## Core Components
//!
//! - **Intent**: step string → `{action, target, value}` parsing
//! - **Descriptor**: snapshot nodes → canonical, signature-stable descriptors
//! - **Matcher / Retrieval**: exact text matching and two-stage embedding retrieval
//! - **XPath**: robust relative selector synthesis
//! - **Store**: persistent promotion and embedding caches
//! - **Pipeline**: the per-step orchestrator
//!
//! ## Example
//!
//! ```rust,ignore
//! use her_core::{Pipeline, PipelineConfig, ReplayDriver, Snapshot};
//! use std::sync::Arc;
//!
//! let driver = Arc::new(ReplayDriver::new(snapshot));
//! let pipeline = Pipeline::new(PipelineConfig::from_env(), driver, None)?;
//!
//! let report = pipeline.run_step("Click \"Login\"").await;
//! if report.ok {
//!     println!("clicked via {}", report.selector.unwrap());
//! }
//! ```

pub mod config;
pub mod descriptor;
pub mod driver;
pub mod embedder;
pub mod error;
pub mod hierarchy;
pub mod intent;
pub mod matcher;
pub mod metrics;
pub mod pipeline;
pub mod rerank;
pub mod retrieval;
pub mod snapshot;
pub mod store;
pub mod vector;
pub mod xpath;

// Re-exports for convenience
pub use config::{PipelineConfig, PipelineConfigBuilder, RetrievalMode};
pub use descriptor::{Candidate, CanonicalBuilder, CanonicalNode};
pub use driver::{Driver, DriverError, DriverResult, ExecutedAction, QueryResult, ReplayDriver};
pub use embedder::{content_hash, Embedder, EmbedderConfig, HashEmbedder, HttpEmbedder};
pub use error::{Error, Result, Stage};
pub use hierarchy::{HtmlContext, HtmlContextBuilder, MAX_DEPTH, MAX_SIBLINGS, MAX_TOKENS};
pub use intent::{label_tokens, Action, IntentParser, IntentValidation, ParsedIntent};
pub use matcher::TargetMatcher;
pub use metrics::{PipelineMetrics, StepMetrics, StepTimings};
pub use pipeline::{page_signature, Pipeline, StepReport};
pub use rerank::{compare_candidates, HeuristicRule, Reranker, HEURISTIC_RULES};
pub use retrieval::{action_query_wrapper, shortlist_size, HybridRetriever, RERANK_CAP};
pub use snapshot::{Accessibility, NodeMeta, RawAttributes, RawNode, Snapshot};
pub use store::{label_key, EmbeddingCache, PromotionStore, SqliteStore};
pub use vector::{FrameIndex, FrameIndexPool, SearchHit, VectorMeta, VectorStore, HTML_DIM, MINI_DIM};
pub use xpath::{is_stable_value, validate as validate_selector, xpath_literal, XPathSynthesizer};
