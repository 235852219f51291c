//! Exact target matching (no-semantic mode).
//!
//! Binds a target string to canonical nodes without any learned model:
//! normalised text and attribute comparison, scored by match quality,
//! deduplicated by backend node id, gated by per-action interactivity.
//! When the DOM yields nothing, the same routine retries against an
//! accessibility-derived view at a score discount, and `type` targets get
//! one more chance against search-shaped inputs.

use crate::descriptor::{Candidate, CanonicalNode};
use crate::error::{Error, Result};
use crate::intent::{Action, ParsedIntent};
use std::collections::HashMap;
use tracing::debug;

/// Attributes consulted for matching, in priority order. Inner text is
/// always checked first.
const MATCH_ATTRIBUTES: &[&str] = &[
    "aria-label",
    "title",
    "placeholder",
    "id",
    "name",
    "value",
    "data-testid",
    "alt",
];

/// Minimum score a match must reach to be accepted.
const MIN_SCORE: f64 = 0.5;

/// Accessibility-tier matches are discounted by this factor.
const A11Y_DISCOUNT: f64 = 0.8;

/// Maximum did-you-mean suggestions attached to a miss.
const MAX_SUGGESTIONS: usize = 5;

/// Deterministic text/attribute matcher.
#[derive(Debug, Clone)]
pub struct TargetMatcher {
    case_sensitive: bool,
}

impl Default for TargetMatcher {
    fn default() -> Self {
        Self {
            case_sensitive: false,
        }
    }
}

impl TargetMatcher {
    /// Create a case-insensitive matcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a case-sensitive matcher.
    pub fn case_sensitive() -> Self {
        Self {
            case_sensitive: true,
        }
    }

    /// Match the intent's target against the node set.
    ///
    /// Returns accepted candidates sorted by score descending, or
    /// `ElementNotFound` with suggestions when every tier comes up empty.
    pub fn match_target(
        &self,
        intent: &ParsedIntent,
        nodes: &[CanonicalNode],
    ) -> Result<Vec<Candidate>> {
        let target = self.normalize(&intent.target);
        if target.is_empty() || nodes.is_empty() {
            return Err(Error::element_not_found(&intent.target, Vec::new()));
        }

        // Tier 1: direct DOM matching over visible nodes.
        let mut matches = self.find_matches(&target, nodes, intent.action, 1.0);

        // Tier 2: accessibility-derived view at a discount.
        if matches.is_empty() {
            matches = self.accessibility_matches(&target, nodes, intent.action);
        }

        // Tier 3: search-shaped inputs for type intents.
        if matches.is_empty() && intent.action == Action::Type {
            matches = self.search_input_matches(nodes);
        }

        if matches.is_empty() {
            let suggestions = self.suggestions(&target, nodes);
            return Err(Error::element_not_found(&intent.target, suggestions));
        }

        let mut candidates = dedup_by_backend_id(matches);
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        debug!(
            target = %intent.target,
            count = candidates.len(),
            "exact match produced candidates"
        );
        Ok(candidates)
    }

    /// Core matching routine over one node view.
    fn find_matches(
        &self,
        target: &str,
        nodes: &[CanonicalNode],
        action: Action,
        factor: f64,
    ) -> Vec<Candidate> {
        let mut out = Vec::new();

        for node in nodes {
            if !node.visible || is_disabled_or_hidden(node) {
                continue;
            }
            if !passes_action_gate(node, action) {
                continue;
            }

            let mut best: Option<(f64, String)> = None;

            if let Some(score) = self.text_score(target, &node.inner_text) {
                best = Some((score, format!("inner_text={:.3}", score)));
            }

            for attr in MATCH_ATTRIBUTES {
                let Some(value) = node.attr(attr) else { continue };
                let Some(score) = self.text_score(target, value) else {
                    continue;
                };
                if best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
                    best = Some((score, format!("{}={:.3}", attr, score)));
                }
            }

            if let Some((score, reason)) = best {
                let score = score * factor;
                if score >= MIN_SCORE {
                    out.push(Candidate::new(node.clone(), score, reason));
                }
            }
        }

        out
    }

    /// Retry over a synthetic accessibility view: nodes reduced to their
    /// accessible name (aria-label / title / alt) and role.
    fn accessibility_matches(
        &self,
        target: &str,
        nodes: &[CanonicalNode],
        action: Action,
    ) -> Vec<Candidate> {
        let mut originals = Vec::new();
        let mut synthetic = Vec::new();
        for node in nodes {
            // The reduced view drops the state attributes, so the filter
            // runs on the original node here.
            if is_disabled_or_hidden(node) {
                continue;
            }
            let Some(name) = node
                .attr("aria-label")
                .or_else(|| node.attr("title"))
                .or_else(|| node.attr("alt"))
            else {
                continue;
            };
            let mut reduced = node.clone();
            reduced.inner_text = name.to_string();
            reduced.attributes.retain(|k, _| k == "role");
            originals.push(node);
            synthetic.push(reduced);
        }

        let mut matches = self.find_matches(target, &synthetic, action, A11Y_DISCOUNT);
        // Restore the full descriptors so downstream stages see the
        // original attributes.
        for candidate in &mut matches {
            if let Some(pos) = synthetic
                .iter()
                .position(|n| n.signature == candidate.node.signature)
            {
                candidate.node = originals[pos].clone();
            }
            candidate.push_reason("tier=accessibility");
        }
        matches
    }

    /// Lower-confidence binding for `type` intents: text inputs whose
    /// name/id/placeholder look like a search box.
    fn search_input_matches(&self, nodes: &[CanonicalNode]) -> Vec<Candidate> {
        let mut out = Vec::new();
        for node in nodes {
            if !node.visible
                || is_disabled_or_hidden(node)
                || !node.tag.eq_ignore_ascii_case("input")
            {
                continue;
            }
            let looks_search = |v: Option<&str>| {
                v.map(|v| {
                    let v = v.to_lowercase();
                    v.contains("search") || v.contains("query") || v.contains("find")
                })
                .unwrap_or(false)
            };

            let score = if looks_search(node.attr("placeholder")) {
                0.9
            } else if looks_search(node.attr("name")) || looks_search(node.attr("id")) {
                0.8
            } else if node
                .attr("type")
                .map(|t| t == "text" || t == "search")
                .unwrap_or(false)
            {
                0.6
            } else {
                continue;
            };

            out.push(Candidate::new(
                node.clone(),
                score,
                format!("search_input={:.3}", score),
            ));
        }
        out
    }

    /// Score one normalised comparison, or None below any tier.
    fn text_score(&self, target: &str, value: &str) -> Option<f64> {
        let value = self.normalize(value);
        if value.is_empty() {
            return None;
        }

        if target == value {
            return Some(1.0);
        }

        if value.contains(target) {
            return Some(target.len() as f64 / value.len() as f64);
        }

        let target_tokens: Vec<&str> = target.split_whitespace().collect();
        let value_tokens: Vec<&str> = value.split_whitespace().collect();
        if !target_tokens.is_empty()
            && !value_tokens.is_empty()
            && target_tokens.iter().all(|t| value_tokens.contains(t))
        {
            return Some(target_tokens.len() as f64 / value_tokens.len() as f64 * 0.8);
        }

        None
    }

    /// Closest non-matching labels, ranked by token overlap with the target.
    fn suggestions(&self, target: &str, nodes: &[CanonicalNode]) -> Vec<String> {
        let target_tokens: Vec<&str> = target.split_whitespace().collect();

        let mut scored: Vec<(usize, usize, String)> = Vec::new();
        for (order, node) in nodes.iter().enumerate() {
            let label = if !node.inner_text.is_empty() {
                node.inner_text.clone()
            } else if let Some(label) = node.primary_label() {
                label.to_string()
            } else {
                continue;
            };

            let normalized = self.normalize(&label);
            let overlap = target_tokens
                .iter()
                .filter(|t| normalized.contains(**t))
                .count();
            let prefix = target
                .chars()
                .zip(normalized.chars())
                .take_while(|(a, b)| a == b)
                .count();
            scored.push((overlap + prefix, order, label));
        }

        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        let mut out = Vec::new();
        for (_, _, label) in scored {
            if !out.contains(&label) {
                out.push(label);
                if out.len() >= MAX_SUGGESTIONS {
                    break;
                }
            }
        }
        out
    }

    fn normalize(&self, text: &str) -> String {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if self.case_sensitive {
            collapsed
        } else {
            collapsed.to_lowercase()
        }
    }
}

/// Whether a node is disabled or hidden and must be skipped before
/// matching.
pub(crate) fn is_disabled_or_hidden(node: &CanonicalNode) -> bool {
    if node.attributes.contains_key("disabled")
        || node
            .attr("aria-disabled")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    {
        return true;
    }

    if node.attributes.contains_key("hidden")
        || node
            .attr("aria-hidden")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    {
        return true;
    }

    if let Some(style) = node.attr("style") {
        let style: String = style.chars().filter(|c| !c.is_whitespace()).collect();
        if style.contains("display:none") || style.contains("visibility:hidden") {
            return true;
        }
    }

    node.attr("type")
        .map(|t| t.eq_ignore_ascii_case("hidden"))
        .unwrap_or(false)
}

/// Per-action interactivity gate.
fn passes_action_gate(node: &CanonicalNode, action: Action) -> bool {
    let tag = node.tag.to_lowercase();
    match action {
        Action::Click => {
            if node.is_text_node() {
                return false;
            }
            if matches!(tag.as_str(), "a" | "button" | "select" | "option") {
                return true;
            }
            if node.role == "combobox" || node.role == "listbox" || node.role == "option" {
                return true;
            }
            if node.attributes.contains_key("data-value") {
                return true;
            }
            if node.is_interactive {
                return true;
            }
            matches!(tag.as_str(), "span" | "div")
                && (node.role == "button" || node.attributes.contains_key("onclick"))
        }
        Action::Type => {
            matches!(tag.as_str(), "input" | "textarea" | "select" | "button")
                || node
                    .attr("contenteditable")
                    .map(|v| v.eq_ignore_ascii_case("true"))
                    .unwrap_or(false)
        }
        Action::Validate => true,
        // Navigation and waits never reach the matcher.
        Action::Navigate | Action::Wait => true,
    }
}

/// Keep the highest-scoring match per backend node id; matches without an
/// id are kept as-is.
fn dedup_by_backend_id(matches: Vec<Candidate>) -> Vec<Candidate> {
    let mut by_id: HashMap<i64, Candidate> = HashMap::new();
    let mut without_id = Vec::new();

    for candidate in matches {
        match candidate.node.backend_node_id {
            Some(id) => match by_id.get(&id) {
                Some(existing) if existing.score >= candidate.score => {}
                _ => {
                    by_id.insert(id, candidate);
                }
            },
            None => without_id.push(candidate),
        }
    }

    let mut out: Vec<Candidate> = by_id.into_values().collect();
    out.extend(without_id);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::CanonicalBuilder;
    use crate::intent::IntentParser;
    use crate::snapshot::{RawNode, Snapshot};

    fn nodes_from(elements: Vec<RawNode>) -> Vec<CanonicalNode> {
        let snapshot = Snapshot::new("https://example.com", "dom", "frame", elements);
        CanonicalBuilder::new().build_all(&snapshot)
    }

    fn intent(step: &str) -> ParsedIntent {
        IntentParser::new().parse(step)
    }

    #[test]
    fn test_exact_inner_text_match_scores_one() {
        let nodes = nodes_from(vec![
            RawNode::new("BUTTON", "Submit").with_backend_id(1),
            RawNode::new("BUTTON", "Cancel").with_backend_id(2),
        ]);

        let candidates = TargetMatcher::new()
            .match_target(&intent("Click \"Submit\""), &nodes)
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert!((candidates[0].score - 1.0).abs() < f64::EPSILON);
        assert_eq!(candidates[0].node.inner_text, "Submit");
    }

    #[test]
    fn test_substring_match_scored_by_length_ratio() {
        let nodes = nodes_from(vec![RawNode::new("BUTTON", "Save All Changes Now")
            .with_backend_id(1)]);

        let candidates = TargetMatcher::new()
            .match_target(&intent("Click \"Save All Changes\""), &nodes)
            .unwrap();
        // "save all changes" (16) / "save all changes now" (20)
        assert!((candidates[0].score - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_ambiguous_targets_rank_exact_first() {
        let nodes = nodes_from(vec![
            RawNode::new("BUTTON", "Save").with_backend_id(1),
            RawNode::new("BUTTON", "Save Changes").with_backend_id(2),
            RawNode::new("BUTTON", "Save All").with_backend_id(3),
        ]);

        let candidates = TargetMatcher::new()
            .match_target(&intent("Click \"Save\""), &nodes)
            .unwrap();
        assert!(candidates.len() >= 2);
        assert_eq!(candidates[0].node.inner_text, "Save");
        assert!((candidates[0].score - 1.0).abs() < f64::EPSILON);
        assert!(candidates[1].score < 1.0);
    }

    #[test]
    fn test_placeholder_binding_for_type() {
        let nodes = nodes_from(vec![RawNode::new("INPUT", "")
            .with_attr("name", "user")
            .with_attr("placeholder", "Username")
            .with_backend_id(4)]);

        let candidates = TargetMatcher::new()
            .match_target(&intent("Type $\"john123\" into \"Username\""), &nodes)
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert!((candidates[0].score - 1.0).abs() < f64::EPSILON);
        assert!(candidates[0].reasons[0].starts_with("placeholder"));
    }

    #[test]
    fn test_aria_label_match_for_icon_button() {
        let nodes = nodes_from(vec![RawNode::new("BUTTON", "")
            .with_attr("aria-label", "Close dialog")
            .with_backend_id(9)]);

        let candidates = TargetMatcher::new()
            .match_target(&intent("Click \"Close dialog\""), &nodes)
            .unwrap();
        assert!((candidates[0].score - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_disabled_nodes_skipped() {
        let nodes = nodes_from(vec![
            RawNode::new("BUTTON", "Submit")
                .with_attr("disabled", "")
                .with_backend_id(1),
            RawNode::new("BUTTON", "Submit")
                .with_attr("aria-disabled", "true")
                .with_backend_id(2),
            RawNode::new("BUTTON", "Submit").with_backend_id(3),
        ]);

        let candidates = TargetMatcher::new()
            .match_target(&intent("Click \"Submit\""), &nodes)
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].node.backend_node_id, Some(3));
    }

    #[test]
    fn test_hidden_attribute_and_style_skipped() {
        let nodes = nodes_from(vec![
            RawNode::new("BUTTON", "Save")
                .with_attr("hidden", "")
                .with_backend_id(1),
            RawNode::new("BUTTON", "Save")
                .with_attr("aria-hidden", "true")
                .with_backend_id(2),
            RawNode::new("BUTTON", "Save")
                .with_attr("style", "display: none")
                .with_backend_id(3),
            RawNode::new("BUTTON", "Save")
                .with_attr("style", "visibility:hidden")
                .with_backend_id(4),
            RawNode::new("BUTTON", "Save")
                .with_attr("style", "color: red")
                .with_backend_id(5),
        ]);

        let candidates = TargetMatcher::new()
            .match_target(&intent("Click \"Save\""), &nodes)
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].node.backend_node_id, Some(5));
    }

    #[test]
    fn test_a11y_tier_skips_disabled() {
        let nodes = nodes_from(vec![RawNode::new("BUTTON", "")
            .with_attr("aria-label", "Dismiss banner")
            .with_attr("disabled", "")
            .with_backend_id(1)]);

        // The only plausible node is disabled, so every tier comes up
        // empty.
        let err = TargetMatcher::new()
            .match_target(&intent("Click \"Dismiss banner\""), &nodes)
            .unwrap_err();
        assert!(matches!(err, Error::ElementNotFound { .. }));
    }

    #[test]
    fn test_invisible_nodes_skipped() {
        let nodes = nodes_from(vec![
            RawNode::new("BUTTON", "Submit").hidden().with_backend_id(1),
            RawNode::new("BUTTON", "Submit").with_backend_id(2),
        ]);

        let candidates = TargetMatcher::new()
            .match_target(&intent("Click \"Submit\""), &nodes)
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].node.backend_node_id, Some(2));
    }

    #[test]
    fn test_click_gate_rejects_plain_div_but_accepts_role_button() {
        let nodes = nodes_from(vec![
            RawNode::new("DIV", "Save").with_backend_id(1),
            RawNode::new("DIV", "Save")
                .with_attr("role", "button")
                .with_backend_id(2),
        ]);

        let candidates = TargetMatcher::new()
            .match_target(&intent("Click \"Save\""), &nodes)
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].node.backend_node_id, Some(2));
    }

    #[test]
    fn test_type_gate_requires_editable() {
        let nodes = nodes_from(vec![
            RawNode::new("SPAN", "Username").with_backend_id(1),
            RawNode::new("INPUT", "")
                .with_attr("placeholder", "Username")
                .with_backend_id(2),
        ]);

        let candidates = TargetMatcher::new()
            .match_target(&intent("Type $\"x\" into \"Username\""), &nodes)
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].node.tag, "INPUT");
    }

    #[test]
    fn test_dedup_keeps_highest_score_per_backend_id() {
        let matches = vec![
            Candidate::new(
                nodes_from(vec![RawNode::new("BUTTON", "Save").with_backend_id(1)])[0].clone(),
                0.6,
                "a",
            ),
            Candidate::new(
                nodes_from(vec![RawNode::new("BUTTON", "Save").with_backend_id(1)])[0].clone(),
                0.9,
                "b",
            ),
        ];
        let deduped = dedup_by_backend_id(matches);
        assert_eq!(deduped.len(), 1);
        assert!((deduped[0].score - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_not_found_includes_suggestions() {
        let nodes = nodes_from(vec![
            RawNode::new("BUTTON", "Submit").with_backend_id(1),
            RawNode::new("BUTTON", "Cancel").with_backend_id(2),
        ]);

        let err = TargetMatcher::new()
            .match_target(&intent("Click \"Flibbertigibbet\""), &nodes)
            .unwrap_err();
        match err {
            Error::ElementNotFound { suggestions, .. } => {
                assert!(!suggestions.is_empty());
                assert!(suggestions.len() <= MAX_SUGGESTIONS);
                assert!(suggestions.contains(&"Submit".to_string()));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_search_input_fallback_for_type() {
        let nodes = nodes_from(vec![RawNode::new("INPUT", "")
            .with_attr("name", "global-search")
            .with_attr("type", "text")
            .with_backend_id(5)]);

        let candidates = TargetMatcher::new()
            .match_target(&intent("Type $\"rust\" into \"Keywords\""), &nodes)
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert!((candidates[0].score - 0.8).abs() < f64::EPSILON);
        assert!(candidates[0].reasons[0].starts_with("search_input"));
    }

    #[test]
    fn test_word_subset_match() {
        let nodes = nodes_from(vec![RawNode::new("BUTTON", "Save your changes")
            .with_backend_id(1)]);

        let candidates = TargetMatcher::new()
            .match_target(&intent("Click \"changes Save\""), &nodes)
            .unwrap();
        // 2 target tokens / 3 value tokens * 0.8
        assert!((candidates[0].score - (2.0 / 3.0 * 0.8)).abs() < 1e-9);
    }
}
