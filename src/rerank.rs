//! Intent-aware reranking heuristics.
//!
//! Adds deterministic bonuses and penalties on top of a candidate's base
//! score (embedding cosine in hybrid mode, textual match score in exact
//! mode). The bonus table is declared as data so it is enumerable and
//! tunable without touching the scorer; final scores are clipped to
//! `[0, 1]` and ties break on base score, interactivity, DOM depth, then
//! backend node id.

use crate::descriptor::{Candidate, CanonicalNode};
use crate::intent::{Action, ParsedIntent};
use std::cmp::Ordering;

/// Tags that accept clicks directly.
const CLICKABLE_TAGS: &[&str] = &["button", "a", "input", "select", "option"];

/// Text fragments marking navigation chrome.
const NAV_REGION_WORDS: &[&str] = &[
    "navigation",
    "nav",
    "header",
    "footer",
    "menu",
    "sidebar",
    "breadcrumb",
];

/// Target-derived context shared by rule predicates.
#[derive(Debug, Clone)]
pub struct RerankContext {
    target_norm: String,
    target_tokens: Vec<String>,
}

impl RerankContext {
    /// Build the context for an intent.
    pub fn new(intent: &ParsedIntent) -> Self {
        let target_norm = normalize(&intent.target);
        let target_tokens = target_norm
            .split_whitespace()
            .map(str::to_string)
            .collect();
        Self {
            target_norm,
            target_tokens,
        }
    }
}

/// One row of the heuristic bonus table.
pub struct HeuristicRule {
    /// Action the rule applies to; `None` = every action
    pub action: Option<Action>,
    /// Whether the rule fires for this node
    pub predicate: fn(&CanonicalNode, &RerankContext) -> bool,
    /// Score delta applied when the rule fires
    pub delta: f64,
    /// Reason tag recorded on the candidate
    pub reason: &'static str,
}

/// The heuristic bonus table.
///
/// Evaluated top to bottom; every firing rule contributes its delta.
pub static HEURISTIC_RULES: &[HeuristicRule] = &[
    // click
    HeuristicRule {
        action: Some(Action::Click),
        predicate: |n, _| n.is_interactive,
        delta: 0.50,
        reason: "interactive",
    },
    HeuristicRule {
        action: Some(Action::Click),
        predicate: |n, _| CLICKABLE_TAGS.contains(&n.tag.to_lowercase().as_str()),
        delta: 0.30,
        reason: "clickable_tag",
    },
    HeuristicRule {
        action: Some(Action::Click),
        predicate: |n, _| n.is_text_node(),
        delta: -1.00,
        reason: "text_node",
    },
    HeuristicRule {
        action: Some(Action::Click),
        predicate: |n, _| n.tag.eq_ignore_ascii_case("button"),
        delta: 0.20,
        reason: "button",
    },
    HeuristicRule {
        action: Some(Action::Click),
        predicate: |n, _| n.tag.eq_ignore_ascii_case("a"),
        delta: 0.10,
        reason: "link",
    },
    HeuristicRule {
        action: Some(Action::Click),
        predicate: |n, _| {
            n.tag.eq_ignore_ascii_case("input")
                && n.attr("type").map(|t| t == "radio").unwrap_or(false)
        },
        delta: 0.30,
        reason: "radio_button",
    },
    HeuristicRule {
        action: Some(Action::Click),
        predicate: |n, _| {
            n.tag.eq_ignore_ascii_case("input")
                && n.attr("type").map(|t| t != "radio").unwrap_or(true)
        },
        delta: 0.20,
        reason: "input",
    },
    // type
    HeuristicRule {
        action: Some(Action::Type),
        predicate: |n, _| {
            n.tag.eq_ignore_ascii_case("input") || n.tag.eq_ignore_ascii_case("textarea")
        },
        delta: 0.30,
        reason: "editable_tag",
    },
    HeuristicRule {
        action: Some(Action::Type),
        predicate: |n, _| {
            n.attr("contenteditable")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false)
        },
        delta: 0.20,
        reason: "contenteditable",
    },
    HeuristicRule {
        action: Some(Action::Type),
        predicate: |n, _| n.attr("placeholder").is_some(),
        delta: 0.10,
        reason: "placeholder",
    },
    // validate
    HeuristicRule {
        action: Some(Action::Validate),
        predicate: |n, _| {
            matches!(
                n.tag.to_lowercase().as_str(),
                "label" | "span" | "div" | "p"
            )
        },
        delta: 0.20,
        reason: "static_text",
    },
    HeuristicRule {
        action: Some(Action::Validate),
        predicate: |n, _| n.attr("aria-label").is_some(),
        delta: 0.10,
        reason: "labelled",
    },
    // universal
    HeuristicRule {
        action: None,
        predicate: |n, _| !n.visible,
        delta: -0.30,
        reason: "hidden",
    },
    HeuristicRule {
        action: None,
        predicate: |n, _| n.below_fold,
        delta: -0.20,
        reason: "below_fold",
    },
    HeuristicRule {
        action: None,
        predicate: |n, _| {
            let text = n.inner_text.to_lowercase();
            NAV_REGION_WORDS.iter().any(|w| text.contains(w))
        },
        delta: -0.10,
        reason: "nav_region",
    },
    HeuristicRule {
        action: None,
        predicate: |n, ctx| !ctx.target_norm.is_empty() && normalize(&n.inner_text) == ctx.target_norm,
        delta: 0.50,
        reason: "exact_text_match",
    },
    HeuristicRule {
        action: None,
        predicate: |n, ctx| {
            if ctx.target_norm.is_empty() {
                return false;
            }
            let text = normalize(&n.inner_text);
            text != ctx.target_norm && text.contains(&ctx.target_norm)
        },
        delta: 0.30,
        reason: "partial_text_match",
    },
    HeuristicRule {
        action: None,
        predicate: |n, ctx| {
            if ctx.target_tokens.is_empty() {
                return false;
            }
            let text = normalize(&n.inner_text);
            if text.contains(&ctx.target_norm) {
                return false;
            }
            let words: Vec<&str> = text.split_whitespace().collect();
            ctx.target_tokens.iter().any(|t| words.contains(&t.as_str()))
        },
        delta: 0.10,
        reason: "token_overlap",
    },
    HeuristicRule {
        action: None,
        predicate: |n, _| n.attr("aria-label").is_some() || n.attr("aria-labelledby").is_some(),
        delta: 0.10,
        reason: "accessible",
    },
];

/// Applies the heuristic table and sorts candidates.
#[derive(Debug, Clone, Default)]
pub struct Reranker {
    /// When set, trust base scores verbatim (no heuristic deltas).
    pub disable_heuristics: bool,
}

impl Reranker {
    /// Create a reranker that applies heuristics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a reranker that trusts base scores verbatim.
    pub fn heuristics_disabled() -> Self {
        Self {
            disable_heuristics: true,
        }
    }

    /// Apply the bonus table to `candidates` and sort them best-first.
    pub fn rerank(&self, mut candidates: Vec<Candidate>, intent: &ParsedIntent) -> Vec<Candidate> {
        if !self.disable_heuristics {
            let ctx = RerankContext::new(intent);
            for candidate in &mut candidates {
                self.score_candidate(candidate, intent.action, &ctx);
            }
        }

        candidates.sort_by(compare_candidates);
        candidates
    }

    fn score_candidate(&self, candidate: &mut Candidate, action: Action, ctx: &RerankContext) {
        let mut score = candidate.base_score;

        for rule in HEURISTIC_RULES {
            if let Some(rule_action) = rule.action {
                if rule_action != action {
                    continue;
                }
            }
            if (rule.predicate)(&candidate.node, ctx) {
                score += rule.delta;
                let sign = if rule.delta >= 0.0 { "+" } else { "" };
                candidate.push_reason(format!("{}{}={:.3}", sign, rule.reason, rule.delta));
            }
        }

        candidate.score = score.clamp(0.0, 1.0);
    }
}

/// Total ordering for ranked candidates.
///
/// Final score descending, then base score descending, interactive before
/// non-interactive, smaller DOM depth, smaller backend node id.
pub fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            b.base_score
                .partial_cmp(&a.base_score)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| b.node.is_interactive.cmp(&a.node.is_interactive))
        .then_with(|| a.node.depth.cmp(&b.node.depth))
        .then_with(|| {
            a.node
                .backend_node_id
                .unwrap_or(i64::MAX)
                .cmp(&b.node.backend_node_id.unwrap_or(i64::MAX))
        })
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
