//! Canonical element descriptors.
//!
//! Converts raw snapshot nodes into `CanonicalNode`s: normalised,
//! equality-stable descriptors used throughout matching and ranking. Each
//! descriptor carries a deterministic 16-hex-char signature so identical
//! nodes hash identically across processes and re-runs.

use crate::snapshot::{RawNode, Snapshot};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Tags considered inherently interactive.
const INTERACTIVE_TAGS: &[&str] = &[
    "button", "a", "input", "select", "textarea", "option", "label", "form", "fieldset",
    "summary", "details",
];

/// Roles considered interactive.
const INTERACTIVE_ROLES: &[&str] = &[
    "button", "link", "menuitem", "tab", "option", "radio", "checkbox", "switch", "textbox",
    "combobox", "listbox", "menu", "menubar", "toolbar", "slider", "progressbar", "scrollbar",
    "tablist", "tree", "grid", "cell", "row", "columnheader", "rowheader", "dialog",
    "alertdialog", "log", "marquee", "status", "timer", "tooltip", "searchbox", "spinbutton",
    "tabpanel",
];

/// Attribute presence that implies interactivity.
const INTERACTIVE_ATTRS: &[&str] = &["onclick", "href", "tabindex", "data-click", "data-action"];

/// Attributes retained on the canonical descriptor.
const KEY_ATTRIBUTES: &[&str] = &[
    "id", "name", "aria-label", "aria-labelledby", "title", "placeholder", "value",
    "data-testid", "class", "type", "href", "role", "alt", "contenteditable", "disabled",
    "aria-disabled", "hidden", "aria-hidden", "style",
];

/// Boolean attributes whose presence matters even with an empty value.
const BOOLEAN_ATTRIBUTES: &[&str] = &["disabled", "hidden"];

/// Inner text is truncated to this many characters inside the signature.
const SIGNATURE_TEXT_LIMIT: usize = 50;

/// Canonical descriptor for a DOM element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalNode {
    /// Upper-case tag name; empty for text nodes
    pub tag: String,
    /// Lower-case accessibility role, if any
    pub role: String,
    /// Whitespace-collapsed inner text (accessible name when text is empty)
    pub inner_text: String,
    /// Retained attributes, sorted by key
    pub attributes: BTreeMap<String, String>,
    /// Parent tag from the hierarchy path, upper-case
    pub parent_tag: String,
    /// Number of sibling elements under the same parent path
    pub siblings_count: usize,
    /// Whether the element is interactive
    pub is_interactive: bool,
    /// Whether the element was visible at capture
    pub visible: bool,
    /// Whether the element sits below the initial viewport
    pub below_fold: bool,
    /// Browsing context the node belongs to
    pub frame_hash: String,
    /// Driver-assigned stable id, when present
    pub backend_node_id: Option<i64>,
    /// Ancestor tag tokens, root-first (empty when unknown)
    pub hierarchy: Vec<String>,
    /// DOM depth (hierarchy length, or XPath segments when derived)
    pub depth: usize,
    /// Deterministic 16-hex-char digest of the descriptor
    pub signature: String,
}

impl CanonicalNode {
    /// Look up a retained attribute.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// First non-empty of id / name / aria-label / title / placeholder.
    pub fn primary_label(&self) -> Option<&str> {
        ["id", "name", "aria-label", "title", "placeholder"]
            .iter()
            .find_map(|a| self.attr(a).filter(|v| !v.is_empty()))
    }

    /// Whether this descriptor came from a text node.
    pub fn is_text_node(&self) -> bool {
        self.tag.is_empty()
    }

    /// Text representation used for query-text embedding: the hierarchy
    /// path (when known) followed by the inner text.
    pub fn text_repr(&self) -> String {
        if self.hierarchy.is_empty() {
            self.inner_text.clone()
        } else {
            format!("{} > {}", self.hierarchy.join(" > "), self.inner_text)
        }
    }
}

/// A scored candidate node.
///
/// Reasons are additive tags (`"markup_cosine=0.730"`, `"+interactive=0.500"`)
/// that accompany the score for observability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// The candidate node
    pub node: CanonicalNode,
    /// Current score in `[0, 1]` after all applied stages
    pub score: f64,
    /// Score before heuristic adjustment
    pub base_score: f64,
    /// Additive reason tags explaining the score
    pub reasons: Vec<String>,
}

impl Candidate {
    /// Create a candidate with an initial score and reason.
    pub fn new(node: CanonicalNode, score: f64, reason: impl Into<String>) -> Self {
        Self {
            node,
            score,
            base_score: score,
            reasons: vec![reason.into()],
        }
    }

    /// Append a reason tag.
    pub fn push_reason(&mut self, reason: impl Into<String>) {
        self.reasons.push(reason.into());
    }
}

/// Builds canonical descriptors from snapshot nodes.
#[derive(Debug, Clone, Default)]
pub struct CanonicalBuilder {
    /// Truncate inner text to this many characters (0 = unlimited).
    pub max_text_length: usize,
}

impl CanonicalBuilder {
    /// Create a builder with the default text cap.
    pub fn new() -> Self {
        Self {
            max_text_length: 1024,
        }
    }

    /// Build descriptors for every node of a snapshot.
    ///
    /// Text nodes are retained (with an empty tag) so fallback text
    /// matching can see them; the matcher filters them from interactive
    /// candidate sets.
    pub fn build_all(&self, snapshot: &Snapshot) -> Vec<CanonicalNode> {
        let sibling_counts = sibling_counts(&snapshot.elements);

        snapshot
            .elements
            .iter()
            .enumerate()
            .map(|(i, node)| {
                let siblings = sibling_counts.get(i).copied().unwrap_or(0);
                self.build(node, siblings, &snapshot.frame_hash)
            })
            .collect()
    }

    /// Build one descriptor.
    pub fn build(&self, node: &RawNode, siblings_count: usize, frame_hash: &str) -> CanonicalNode {
        let tag = extract_tag(node);
        let role = extract_role(node);
        let inner_text = self.extract_inner_text(node);
        let attributes = extract_attributes(node);
        let (parent_tag, hierarchy, depth) = extract_hierarchy(node);
        let is_interactive = is_element_interactive(&tag, &role, &attributes);

        let frame = if node.meta.frame_hash.is_empty() {
            frame_hash.to_string()
        } else {
            node.meta.frame_hash.clone()
        };

        let signature = build_signature(
            &tag,
            &role,
            &inner_text,
            &attributes,
            &parent_tag,
            siblings_count,
            node.backend_node_id,
        );

        CanonicalNode {
            tag,
            role,
            inner_text,
            attributes,
            parent_tag,
            siblings_count,
            is_interactive,
            visible: node.visible,
            below_fold: node.below_fold,
            frame_hash: frame,
            backend_node_id: node.backend_node_id,
            hierarchy,
            depth,
            signature,
        }
    }

    fn extract_inner_text(&self, node: &RawNode) -> String {
        let mut text = collapse_whitespace(&node.text);

        if text.is_empty() {
            if let Some(a11y) = &node.accessibility {
                text = collapse_whitespace(&a11y.name);
            }
        }

        if self.max_text_length > 0 && text.chars().count() > self.max_text_length {
            text = text.chars().take(self.max_text_length).collect();
        }
        text
    }
}

fn extract_tag(node: &RawNode) -> String {
    if node.is_text_node() {
        String::new()
    } else {
        node.tag.to_uppercase()
    }
}

fn extract_role(node: &RawNode) -> String {
    if let Some(role) = node.attributes.get("role").filter(|r| !r.is_empty()) {
        return role.to_lowercase();
    }
    node.accessibility
        .as_ref()
        .map(|a| a.role.to_lowercase())
        .unwrap_or_default()
}

fn extract_attributes(node: &RawNode) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for key in KEY_ATTRIBUTES {
        if let Some(value) = node.attributes.get(key) {
            let value = value.trim();
            if !value.is_empty() || BOOLEAN_ATTRIBUTES.contains(key) {
                out.insert((*key).to_string(), value.to_string());
            }
        }
    }
    out
}

/// Parent tag, hierarchy path, and depth for a node.
///
/// Prefers the explicit hierarchy path; falls back to inspecting the
/// driver's XPath hint.
fn extract_hierarchy(node: &RawNode) -> (String, Vec<String>, usize) {
    if let Some(path) = node.hierarchy.as_ref().filter(|p| !p.is_empty()) {
        let hierarchy: Vec<String> = path.iter().map(|t| t.to_uppercase()).collect();
        let parent = hierarchy.last().cloned().unwrap_or_default();
        let depth = hierarchy.len();
        return (parent, hierarchy, depth);
    }

    if let Some(xpath) = node.xpath.as_deref() {
        let segments: Vec<&str> = xpath.split('/').filter(|s| !s.is_empty()).collect();
        if segments.len() >= 2 {
            let parent = segments[segments.len() - 2];
            let parent = parent.split('[').next().unwrap_or(parent).to_uppercase();
            let hierarchy: Vec<String> = segments[..segments.len() - 1]
                .iter()
                .map(|s| s.split('[').next().unwrap_or(s).to_uppercase())
                .collect();
            return (parent, hierarchy, segments.len().saturating_sub(1));
        }
    }

    (String::new(), Vec::new(), 0)
}

fn is_element_interactive(tag: &str, role: &str, attributes: &BTreeMap<String, String>) -> bool {
    let tag_lower = tag.to_lowercase();

    if INTERACTIVE_TAGS.contains(&tag_lower.as_str()) {
        // Hidden inputs are never interactive.
        if tag_lower == "input" {
            return attributes
                .get("type")
                .map(|t| !t.eq_ignore_ascii_case("hidden"))
                .unwrap_or(true);
        }
        return true;
    }

    if !role.is_empty() && INTERACTIVE_ROLES.contains(&role) {
        return true;
    }

    INTERACTIVE_ATTRS.iter().any(|a| attributes.contains_key(*a))
}

/// Deterministic signature digest.
///
/// Components are concatenated in a fixed order (primary identity
/// attribute, tag, role, truncated text, parent, sibling count, backend
/// id) so that attribute ordering on the wire cannot change the result.
fn build_signature(
    tag: &str,
    role: &str,
    inner_text: &str,
    attributes: &BTreeMap<String, String>,
    parent_tag: &str,
    siblings_count: usize,
    backend_node_id: Option<i64>,
) -> String {
    let mut components: Vec<String> = Vec::new();

    for key in ["id", "name", "aria-label", "title", "placeholder"] {
        if let Some(value) = attributes.get(key).filter(|v| !v.is_empty()) {
            components.push(format!("{}:{}", key, value));
            break;
        }
    }

    if !tag.is_empty() {
        components.push(format!("tag:{}", tag));
    }
    if !role.is_empty() {
        components.push(format!("role:{}", role));
    }
    if !inner_text.is_empty() {
        let text: String = inner_text.chars().take(SIGNATURE_TEXT_LIMIT).collect();
        components.push(format!("text:{}", text));
    }
    if !parent_tag.is_empty() {
        components.push(format!("parent:{}", parent_tag));
    }
    if siblings_count > 0 {
        components.push(format!("siblings:{}", siblings_count));
    }
    if let Some(id) = backend_node_id {
        components.push(format!("backend:{}", id));
    }

    let composed = components.join("|");
    let digest = Sha256::digest(composed.as_bytes());
    let hex = format!("{:x}", digest);
    hex[..16].to_string()
}

/// Count, for each node, how many other elements share its parent path.
fn sibling_counts(elements: &[RawNode]) -> Vec<usize> {
    let parent_key = |node: &RawNode| -> Option<String> {
        if let Some(h) = node.hierarchy.as_ref().filter(|h| !h.is_empty()) {
            return Some(format!("h:{}", h.join("/").to_uppercase()));
        }
        let xpath = node.xpath.as_deref()?;
        let cut = xpath.rfind('/')?;
        Some(format!("x:{}", &xpath[..cut]))
    };

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    let keys: Vec<Option<String>> = elements.iter().map(parent_key).collect();
    for key in keys.iter().flatten() {
        *counts.entry(key.clone()).or_insert(0) += 1;
    }

    keys.iter()
        .map(|key| {
            key.as_ref()
                .and_then(|k| counts.get(k))
                .map(|n| n.saturating_sub(1))
                .unwrap_or(0)
        })
        .collect()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
