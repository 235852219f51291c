//! Pipeline configuration.
//!
//! All configuration is an explicit owned value passed to the pipeline at
//! construction; `from_env` reads the recognised `HER_*` environment
//! variables for deployments that configure through the environment.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Retrieval mode for a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetrievalMode {
    /// Deterministic text/attribute matching, no embedders.
    NoSemantic,
    /// Two-stage embedding retrieval fused with heuristics.
    Semantic,
}

impl RetrievalMode {
    /// Prefix applied to promotion label keys so the two modes never
    /// cross-contaminate.
    pub fn label_prefix(&self) -> &'static str {
        match self {
            Self::NoSemantic => "no-semantic:",
            Self::Semantic => "",
        }
    }
}

impl std::fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSemantic => write!(f, "no-semantic"),
            Self::Semantic => write!(f, "semantic"),
        }
    }
}

/// Configuration for the retrieval pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Filesystem path to embedder assets
    pub models_dir: Option<PathBuf>,
    /// Directory housing the SQL database
    pub cache_dir: PathBuf,
    /// Whether to use two-stage embedding retrieval (default: true)
    pub use_semantic_search: bool,
    /// When true, trust rerank scores verbatim (default: false)
    pub disable_heuristics: bool,
    /// Run the browser headless (forwarded to the driver; default: true)
    pub headless: bool,
    /// Timeout for a single driver action in milliseconds (default: 10s)
    pub browser_timeout_ms: u64,
    /// Timeout for navigation in milliseconds (default: 30s)
    pub navigation_timeout_ms: u64,
    /// Maximum text length considered per node (default: 1024)
    pub max_text_length: usize,
    /// Maximum elements considered per snapshot (default: 1000)
    pub max_elements: usize,
    /// Soft size cap for the SQL database in MiB (default: 400)
    pub cache_size_mb: u64,
    /// Number of candidates requested from retrieval (default: 20)
    pub top_k: usize,
    /// Maximum per-frame vector indices retained (default: 10)
    pub max_frame_indices: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            models_dir: None,
            cache_dir: PathBuf::from(".her_cache"),
            use_semantic_search: true,
            disable_heuristics: false,
            headless: true,
            browser_timeout_ms: 10_000,
            navigation_timeout_ms: 30_000,
            max_text_length: 1024,
            max_elements: 1000,
            cache_size_mb: 400,
            top_k: 20,
            max_frame_indices: 10,
        }
    }
}

impl PipelineConfig {
    /// Read configuration from the recognised `HER_*` environment variables.
    ///
    /// Unset or unparseable variables fall back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(dir) = env_var("HER_MODELS_DIR") {
            config.models_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = env_var("HER_CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Some(v) = env_bool("HER_USE_SEMANTIC_SEARCH") {
            config.use_semantic_search = v;
        }
        if let Some(v) = env_bool("HER_DISABLE_HEURISTICS") {
            config.disable_heuristics = v;
        }
        if let Some(v) = env_bool("HER_HEADLESS") {
            config.headless = v;
        }
        if let Some(v) = env_parse("HER_BROWSER_TIMEOUT_MS") {
            config.browser_timeout_ms = v;
        }
        if let Some(v) = env_parse("HER_MAX_TEXT_LENGTH") {
            config.max_text_length = v;
        }
        if let Some(v) = env_parse("HER_MAX_ELEMENTS") {
            config.max_elements = v;
        }
        if let Some(v) = env_parse("HER_CACHE_SIZE_MB") {
            config.cache_size_mb = v;
        }

        config
    }

    /// The retrieval mode selected by this configuration.
    pub fn mode(&self) -> RetrievalMode {
        if self.use_semantic_search {
            RetrievalMode::Semantic
        } else {
            RetrievalMode::NoSemantic
        }
    }

    /// Path of the SQL database file under `cache_dir`.
    pub fn db_path(&self) -> PathBuf {
        self.cache_dir.join("her.db")
    }
}

/// Builder for creating pipeline configurations.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache directory.
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = dir.into();
        self
    }

    /// Set the models directory.
    pub fn models_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.models_dir = Some(dir.into());
        self
    }

    /// Enable or disable semantic search.
    pub fn use_semantic_search(mut self, enabled: bool) -> Self {
        self.config.use_semantic_search = enabled;
        self
    }

    /// Enable or disable the heuristic reranker.
    pub fn disable_heuristics(mut self, disabled: bool) -> Self {
        self.config.disable_heuristics = disabled;
        self
    }

    /// Set the per-action driver timeout in milliseconds.
    pub fn browser_timeout_ms(mut self, ms: u64) -> Self {
        self.config.browser_timeout_ms = ms;
        self
    }

    /// Set the candidate count requested from retrieval.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the soft database size cap in MiB.
    pub fn cache_size_mb(mut self, mb: u64) -> Self {
        self.config.cache_size_mb = mb;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> PipelineConfig {
        self.config
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_bool(key: &str) -> Option<bool> {
    env_var(key).map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_var(key).and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert!(config.use_semantic_search);
        assert!(!config.disable_heuristics);
        assert_eq!(config.browser_timeout_ms, 10_000);
        assert_eq!(config.navigation_timeout_ms, 30_000);
        assert_eq!(config.max_frame_indices, 10);
        assert_eq!(config.mode(), RetrievalMode::Semantic);
    }

    #[test]
    fn test_builder() {
        let config = PipelineConfigBuilder::new()
            .cache_dir("/tmp/her")
            .use_semantic_search(false)
            .top_k(5)
            .build();

        assert_eq!(config.cache_dir, PathBuf::from("/tmp/her"));
        assert_eq!(config.mode(), RetrievalMode::NoSemantic);
        assert_eq!(config.top_k, 5);
        assert_eq!(config.db_path(), PathBuf::from("/tmp/her/her.db"));
    }

    #[test]
    fn test_mode_label_prefix() {
        assert_eq!(RetrievalMode::NoSemantic.label_prefix(), "no-semantic:");
        assert_eq!(RetrievalMode::Semantic.label_prefix(), "");
    }
}
