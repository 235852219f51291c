//! Pipeline orchestrator.
//!
//! Drives one step through the state machine
//! `Parse → CheckPromotion → Match → Rerank → Synth → Execute → Record`.
//! Every transition is timed; failures carry the stage they occurred in.
//! Promotion hits short-circuit matching entirely; failures walk the
//! fallback chain before surfacing.

use crate::config::{PipelineConfig, RetrievalMode};
use crate::descriptor::{Candidate, CanonicalBuilder, CanonicalNode};
use crate::driver::{Driver, DriverError};
use crate::embedder::{Embedder, HashEmbedder};
use crate::error::{Error, Result, Stage};
use crate::intent::{Action, IntentParser, ParsedIntent};
use crate::matcher::TargetMatcher;
use crate::metrics::{PipelineMetrics, StepMetrics};
use crate::rerank::Reranker;
use crate::retrieval::HybridRetriever;
use crate::snapshot::Snapshot;
use crate::store::{label_key, EmbeddingCache, PromotionStore, SqliteStore};
use crate::xpath::XPathSynthesizer;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Alternate selectors tried after the primary.
const MAX_ALTERNATES: usize = 2;

/// Structured outcome of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    /// Step id
    pub step_id: Uuid,
    /// Whether the step succeeded
    pub ok: bool,
    /// Action the step resolved to
    pub action: Option<Action>,
    /// Selector the action ran against, when one was chosen
    pub selector: Option<String>,
    /// Stage the failure occurred in
    pub stage: Option<Stage>,
    /// Failure kind tag
    pub kind: Option<String>,
    /// One-line failure reason
    pub message: Option<String>,
    /// Did-you-mean suggestions, when applicable
    pub suggestions: Vec<String>,
    /// Candidates considered during matching
    pub candidates_considered: usize,
    /// Per-step observability record
    pub metrics: StepMetrics,
}

/// Signature of a page state: truncated digest of `url | dom_hash`.
pub fn page_signature(url: &str, dom_hash: &str) -> String {
    let digest = Sha256::digest(format!("{url}|{dom_hash}").as_bytes());
    format!("{:x}", digest)[..16].to_string()
}

/// The retrieval pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    driver: Arc<dyn Driver>,
    parser: IntentParser,
    builder: CanonicalBuilder,
    matcher: TargetMatcher,
    reranker: Reranker,
    synthesizer: XPathSynthesizer,
    retriever: Option<HybridRetriever>,
    promotions: PromotionStore,
    store: SqliteStore,
    metrics: Mutex<PipelineMetrics>,
}

impl Pipeline {
    /// Create a pipeline over an on-disk cache database.
    ///
    /// In semantic mode a missing embedder degrades to the deterministic
    /// hash embedder rather than failing construction.
    pub fn new(
        config: PipelineConfig,
        driver: Arc<dyn Driver>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Result<Self> {
        let store = SqliteStore::open(config.db_path(), config.cache_size_mb)?;
        Self::with_store(config, driver, embedder, store)
    }

    /// Create a pipeline over an in-memory cache database (for testing).
    pub fn in_memory(
        config: PipelineConfig,
        driver: Arc<dyn Driver>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Result<Self> {
        let store = SqliteStore::in_memory()?;
        Self::with_store(config, driver, embedder, store)
    }

    fn with_store(
        config: PipelineConfig,
        driver: Arc<dyn Driver>,
        embedder: Option<Arc<dyn Embedder>>,
        store: SqliteStore,
    ) -> Result<Self> {
        // The embedder is only ever constructed for semantic mode; exact
        // mode must not be able to reach one.
        let retriever = if config.mode() == RetrievalMode::Semantic {
            let embedder = embedder.unwrap_or_else(|| {
                warn!("no embedder supplied; degrading to deterministic hash embeddings");
                Arc::new(HashEmbedder::new())
            });
            Some(HybridRetriever::new(
                embedder,
                EmbeddingCache::new(store.clone()),
                config.max_frame_indices,
            ))
        } else {
            None
        };

        let reranker = if config.disable_heuristics {
            Reranker::heuristics_disabled()
        } else {
            Reranker::new()
        };

        let mut builder = CanonicalBuilder::new();
        builder.max_text_length = config.max_text_length;

        Ok(Self {
            promotions: PromotionStore::new(store.clone()),
            parser: IntentParser::new(),
            builder,
            matcher: TargetMatcher::new(),
            reranker,
            synthesizer: XPathSynthesizer::new(),
            retriever,
            driver,
            config,
            store,
            metrics: Mutex::new(PipelineMetrics::default()),
        })
    }

    /// Pipeline configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Snapshot of the process-wide counters.
    pub fn metrics(&self) -> PipelineMetrics {
        self.metrics
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Execute one step.
    pub async fn run_step(&self, step: &str) -> StepReport {
        let mut step_metrics = StepMetrics::start();

        match self.run_step_inner(step, &mut step_metrics).await {
            Ok(mut report) => {
                report.metrics = step_metrics;
                report.metrics.ok = true;
                report.step_id = report.metrics.step_id;
                self.fold_metrics(&report.metrics, None);
                report
            }
            Err(err) => {
                let report = self.failure_report(step, err, step_metrics.clone());
                self.fold_metrics(&report.metrics, report.kind.as_deref());
                report
            }
        }
    }

    async fn run_step_inner(
        &self,
        step: &str,
        step_metrics: &mut StepMetrics,
    ) -> Result<StepReport> {
        // Parse
        let started = Instant::now();
        let intent = self.parser.parse(step);
        let validation = self.parser.validate(&intent);
        step_metrics
            .timings
            .record(Stage::Parse, started.elapsed());
        if !validation.valid {
            return Err(Error::invalid_intent(validation.issues).at_stage(Stage::Parse));
        }

        // Per-step dispatch for actions that never touch the matcher.
        match intent.action {
            Action::Navigate => return self.run_navigate(&intent, step_metrics).await,
            Action::Wait => return self.run_wait(&intent, step_metrics).await,
            _ => {}
        }

        // CheckPromotion
        let started = Instant::now();
        let snapshot = self
            .driver
            .snapshot()
            .await
            .map_err(|e| map_driver_error(e).at_stage(Stage::CheckPromotion))?;
        let page_sig = page_signature(&snapshot.url, &snapshot.dom_hash);
        let key = format!(
            "{}{}",
            self.config.mode().label_prefix(),
            label_key(&intent.label_tokens)
        );

        let promoted = self
            .promotions
            .lookup(&page_sig, &snapshot.frame_hash, &key)
            .unwrap_or_else(|e| {
                warn!(error = %e, "promotion lookup failed; continuing cold");
                None
            });
        let validated_promotion = match &promoted {
            Some(selector) => self
                .driver
                .query(selector)
                .await
                .map(|r| r.count >= 1)
                .unwrap_or(false),
            None => false,
        };
        step_metrics
            .timings
            .record(Stage::CheckPromotion, started.elapsed());

        if let (Some(selector), true) = (&promoted, validated_promotion) {
            step_metrics.promotion_hit = true;
            info!(%selector, "promotion warm path");
            match self
                .execute_selectors(&intent, std::slice::from_ref(selector), step_metrics)
                .await
            {
                Ok(executed) => {
                    self.record_promotion(&page_sig, &snapshot.frame_hash, &key, &executed, true);
                    return Ok(self.success_report(&intent, executed, 0));
                }
                Err(err) => {
                    // A stale promotion falls back to the cold path.
                    warn!(error = %err, "promoted selector failed; re-matching");
                    self.record_promotion(&page_sig, &snapshot.frame_hash, &key, selector, false);
                    step_metrics.fallback_depth += 1;
                }
            }
        }

        // Match
        let started = Instant::now();
        let nodes = self.canonicalize(&snapshot);
        let candidates = self.match_candidates(&intent, &nodes, &snapshot, step_metrics).await;
        step_metrics
            .timings
            .record(Stage::Match, started.elapsed());
        let candidates = candidates.map_err(|e| e.at_stage(Stage::Match))?;

        // Rerank
        let started = Instant::now();
        let ranked = self.reranker.rerank(candidates, &intent);
        step_metrics
            .timings
            .record(Stage::Rerank, started.elapsed());
        let considered = ranked.len();

        // Synth
        let started = Instant::now();
        let selectors = self.synthesize(&ranked).await?;
        step_metrics
            .timings
            .record(Stage::Synth, started.elapsed());

        // Execute
        let executed = self
            .execute_selectors(&intent, &selectors, step_metrics)
            .await;

        // Record
        let started = Instant::now();
        let report = match executed {
            Ok(selector) => {
                self.record_promotion(&page_sig, &snapshot.frame_hash, &key, &selector, true);
                Ok(self.success_report(&intent, selector, considered))
            }
            Err(err) => {
                if let Some(primary) = selectors.first() {
                    self.record_promotion(&page_sig, &snapshot.frame_hash, &key, primary, false);
                }
                Err(err)
            }
        };
        step_metrics
            .timings
            .record(Stage::Record, started.elapsed());

        report
    }

    async fn run_navigate(
        &self,
        intent: &ParsedIntent,
        step_metrics: &mut StepMetrics,
    ) -> Result<StepReport> {
        let started = Instant::now();
        let timeout_ms = self.config.navigation_timeout_ms;
        let result = with_timeout(timeout_ms, self.driver.goto(&intent.target, timeout_ms)).await;
        step_metrics
            .timings
            .record(Stage::Execute, started.elapsed());
        result.map_err(|e| e.at_stage(Stage::Execute))?;
        Ok(self.success_report(intent, intent.target.clone(), 0))
    }

    async fn run_wait(
        &self,
        intent: &ParsedIntent,
        step_metrics: &mut StepMetrics,
    ) -> Result<StepReport> {
        let started = Instant::now();
        let ms = intent.wait_ms().unwrap_or(1000);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        step_metrics
            .timings
            .record(Stage::Execute, started.elapsed());
        let mut report = self.success_report(intent, String::new(), 0);
        report.selector = None;
        Ok(report)
    }

    fn canonicalize(&self, snapshot: &Snapshot) -> Vec<CanonicalNode> {
        let mut bounded = snapshot.clone();
        if bounded.elements.len() > self.config.max_elements {
            bounded.elements.truncate(self.config.max_elements);
        }
        self.builder.build_all(&bounded)
    }

    /// Mode dispatch plus the resilience chain.
    async fn match_candidates(
        &self,
        intent: &ParsedIntent,
        nodes: &[CanonicalNode],
        snapshot: &Snapshot,
        step_metrics: &mut StepMetrics,
    ) -> Result<Vec<Candidate>> {
        match &self.retriever {
            None => self.matcher.match_target(intent, nodes),
            Some(retriever) => {
                let retrieved = retriever
                    .retrieve(
                        intent,
                        nodes,
                        &snapshot.frame_hash,
                        self.config.top_k,
                        &self.reranker,
                    )
                    .await;

                match retrieved {
                    Ok(candidates) if !candidates.is_empty() => Ok(candidates),
                    Ok(_) => {
                        step_metrics.fallback_depth += 1;
                        self.fallback_chain(intent, nodes, step_metrics)
                    }
                    Err(err) => {
                        warn!(error = %err, "hybrid retrieval failed; walking fallback chain");
                        step_metrics.fallback_depth += 1;
                        self.fallback_chain(intent, nodes, step_metrics)
                    }
                }
            }
        }
    }

    /// Hybrid failure chain: exact match, then bare text containment,
    /// then ElementNotFound. The exact matcher already retries through
    /// its accessibility tier.
    fn fallback_chain(
        &self,
        intent: &ParsedIntent,
        nodes: &[CanonicalNode],
        step_metrics: &mut StepMetrics,
    ) -> Result<Vec<Candidate>> {
        match self.matcher.match_target(intent, nodes) {
            Ok(candidates) => return Ok(candidates),
            Err(first_err) => {
                step_metrics.fallback_depth += 1;
                let contains = text_contains_candidates(intent, nodes);
                if !contains.is_empty() {
                    return Ok(contains);
                }
                Err(first_err)
            }
        }
    }

    /// Build primary selector plus alternates, walking candidates in rank
    /// order until one yields a selector that exists in the page.
    async fn synthesize(&self, ranked: &[Candidate]) -> Result<Vec<String>> {
        let mut last_err: Option<Error> = None;

        for candidate in ranked {
            let alternatives = self
                .synthesizer
                .alternatives(&candidate.node, 1 + MAX_ALTERNATES);
            if alternatives.is_empty() {
                last_err = Some(Error::XPathGeneration(format!(
                    "no valid selector for <{}>",
                    candidate.node.tag.to_lowercase()
                )));
                continue;
            }

            // Validate against the live page; keep only selectors that
            // resolve to at least one node.
            let mut live: Vec<String> = Vec::new();
            for selector in alternatives {
                let count = self
                    .driver
                    .query(&selector)
                    .await
                    .map(|r| r.count)
                    .unwrap_or(0);
                if count >= 1 {
                    live.push(selector);
                }
            }

            if !live.is_empty() {
                debug!(primary = %live[0], alternates = live.len() - 1, "selector synthesised");
                return Ok(live);
            }
            last_err = Some(Error::XPathGeneration(
                "no synthesised selector resolved on the page".to_string(),
            ));
        }

        Err(last_err
            .unwrap_or_else(|| Error::XPathGeneration("no candidates to synthesise".to_string()))
            .at_stage(Stage::Synth))
    }

    /// Dispatch the action, trying each selector in order.
    async fn execute_selectors(
        &self,
        intent: &ParsedIntent,
        selectors: &[String],
        step_metrics: &mut StepMetrics,
    ) -> Result<String> {
        let started = Instant::now();
        let timeout_ms = self.config.browser_timeout_ms;
        let mut last_err: Option<Error> = None;

        for (i, selector) in selectors.iter().enumerate() {
            let result = match intent.action {
                Action::Click => {
                    with_timeout(timeout_ms, self.driver.click(selector, timeout_ms)).await
                }
                Action::Type => {
                    let value = intent.value.as_deref().unwrap_or("");
                    with_timeout(
                        timeout_ms,
                        self.driver.fill(selector, value, timeout_ms, true),
                    )
                    .await
                }
                Action::Validate => {
                    let result = with_timeout(timeout_ms, self.driver.query(selector)).await;
                    result.and_then(|r| {
                        if r.count >= 1 {
                            Ok(())
                        } else {
                            Err(Error::execution(selector, "validation target not present"))
                        }
                    })
                }
                Action::Navigate | Action::Wait => Ok(()),
            };

            match result {
                Ok(()) => {
                    if i > 0 {
                        step_metrics.fallback_depth += 1;
                    }
                    step_metrics
                        .timings
                        .record(Stage::Execute, started.elapsed());
                    return Ok(selector.clone());
                }
                Err(err) => {
                    debug!(selector = %selector, error = %err, "selector execution failed");
                    last_err = Some(err);
                }
            }
        }

        step_metrics
            .timings
            .record(Stage::Execute, started.elapsed());
        Err(last_err
            .unwrap_or_else(|| Error::Internal("no selectors to execute".to_string()))
            .at_stage(Stage::Execute))
    }

    /// Non-throwing promotion recording; failure to record never masks
    /// the action outcome.
    fn record_promotion(
        &self,
        page_sig: &str,
        frame_hash: &str,
        label_key: &str,
        selector: &str,
        success: bool,
    ) {
        if let Err(err) = self
            .promotions
            .record(page_sig, frame_hash, label_key, selector, success)
        {
            warn!(error = %err, "failed to record promotion");
        }
        if let Err(err) = self.store.vacuum_if_needed() {
            warn!(error = %err, "cache vacuum failed");
        }
    }

    fn success_report(
        &self,
        intent: &ParsedIntent,
        selector: String,
        considered: usize,
    ) -> StepReport {
        StepReport {
            step_id: Uuid::new_v4(),
            ok: true,
            action: Some(intent.action),
            selector: if selector.is_empty() {
                None
            } else {
                Some(selector)
            },
            stage: None,
            kind: None,
            message: None,
            suggestions: Vec::new(),
            candidates_considered: considered,
            metrics: StepMetrics::start(),
        }
    }

    fn failure_report(&self, step: &str, err: Error, metrics: StepMetrics) -> StepReport {
        let suggestions = match &err {
            Error::ElementNotFound { suggestions, .. } => suggestions.clone(),
            Error::Staged { source, .. } => match source.as_ref() {
                Error::ElementNotFound { suggestions, .. } => suggestions.clone(),
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };

        warn!(step, error = %err, "step failed");
        StepReport {
            step_id: metrics.step_id,
            ok: false,
            action: None,
            selector: None,
            stage: err.stage(),
            kind: Some(err.kind().to_string()),
            message: Some(err.to_string()),
            suggestions,
            candidates_considered: 0,
            metrics,
        }
    }

    fn fold_metrics(&self, step: &StepMetrics, kind: Option<&str>) {
        if let Ok(mut metrics) = self.metrics.lock() {
            metrics.record_step(step);
            if kind == Some("element_not_found") {
                metrics.record_not_found();
            }
        }
    }
}

/// Wrap a driver future in the per-action budget.
async fn with_timeout<T>(
    timeout_ms: u64,
    fut: impl std::future::Future<Output = std::result::Result<T, DriverError>>,
) -> Result<T> {
    match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
        Ok(result) => result.map_err(map_driver_error),
        Err(_) => Err(Error::timeout(timeout_ms)),
    }
}

fn map_driver_error(err: DriverError) -> Error {
    match err {
        DriverError::Timeout { duration_ms } => Error::timeout(duration_ms),
        DriverError::NotFound { selector } => Error::execution(selector, "element not found"),
        DriverError::Other(message) => Error::execution("", message),
    }
}

/// Bare text-containment fallback used at the bottom of the resilience
/// chain.
fn text_contains_candidates(intent: &ParsedIntent, nodes: &[CanonicalNode]) -> Vec<Candidate> {
    let target = intent.target.to_lowercase();
    if target.is_empty() {
        return Vec::new();
    }

    nodes
        .iter()
        .filter(|n| n.visible && !n.is_text_node() && !crate::matcher::is_disabled_or_hidden(n))
        .filter(|n| n.inner_text.to_lowercase().contains(&target))
        .map(|n| Candidate::new(n.clone(), 0.5, "text_contains=0.500"))
        .collect()
}
