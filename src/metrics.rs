//! Pipeline metrics.
//!
//! Per-step stage timings plus process-wide counters. The orchestrator
//! records into these; they are exposed read-only for observability and
//! never influence retrieval decisions.

use crate::error::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Stage timings for one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepTimings {
    entries: Vec<(Stage, u64)>,
}

impl StepTimings {
    /// Create empty timings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a stage duration.
    pub fn record(&mut self, stage: Stage, duration: Duration) {
        self.entries.push((stage, duration.as_millis() as u64));
    }

    /// Milliseconds spent in a stage, when it ran.
    pub fn millis(&self, stage: Stage) -> Option<u64> {
        self.entries
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, ms)| *ms)
    }

    /// Total milliseconds across recorded stages.
    pub fn total_millis(&self) -> u64 {
        self.entries.iter().map(|(_, ms)| ms).sum()
    }

    /// Stages in execution order.
    pub fn stages(&self) -> Vec<Stage> {
        self.entries.iter().map(|(s, _)| *s).collect()
    }
}

/// Observability record for one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepMetrics {
    /// Step id
    pub step_id: Uuid,
    /// When the step started
    pub started_at: DateTime<Utc>,
    /// Per-stage timings
    pub timings: StepTimings,
    /// Whether a promoted selector short-circuited matching
    pub promotion_hit: bool,
    /// How deep the fallback chain went (0 = primary path)
    pub fallback_depth: u32,
    /// Whether the step succeeded
    pub ok: bool,
}

impl StepMetrics {
    /// Create a record for a new step.
    pub fn start() -> Self {
        Self {
            step_id: Uuid::new_v4(),
            started_at: Utc::now(),
            timings: StepTimings::new(),
            promotion_hit: false,
            fallback_depth: 0,
            ok: false,
        }
    }
}

/// Process-wide counters across steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineMetrics {
    /// Steps executed
    pub steps_total: u64,
    /// Steps that surfaced a failure
    pub steps_failed: u64,
    /// Promotion lookups that short-circuited matching
    pub promotion_hits: u64,
    /// Promotion lookups that missed
    pub promotion_misses: u64,
    /// Steps that ended in ElementNotFound
    pub elements_not_found: u64,
    /// Steps resolved through a fallback tier
    pub fallback_used: u64,
    /// Cumulative wall-clock milliseconds across steps
    pub total_millis: u64,
}

impl PipelineMetrics {
    /// Fold one finished step into the counters.
    pub fn record_step(&mut self, step: &StepMetrics) {
        self.steps_total += 1;
        if !step.ok {
            self.steps_failed += 1;
        }
        if step.promotion_hit {
            self.promotion_hits += 1;
        } else {
            self.promotion_misses += 1;
        }
        if step.fallback_depth > 0 {
            self.fallback_used += 1;
        }
        self.total_millis += step.timings.total_millis();
    }

    /// Record an ElementNotFound outcome.
    pub fn record_not_found(&mut self) {
        self.elements_not_found += 1;
    }

    /// Fraction of steps served from the promotion cache.
    pub fn promotion_hit_rate(&self) -> f64 {
        let total = self.promotion_hits + self.promotion_misses;
        if total == 0 {
            0.0
        } else {
            self.promotion_hits as f64 / total as f64
        }
    }

    /// Fraction of steps that failed.
    pub fn failure_rate(&self) -> f64 {
        if self.steps_total == 0 {
            0.0
        } else {
            self.steps_failed as f64 / self.steps_total as f64
        }
    }
}
