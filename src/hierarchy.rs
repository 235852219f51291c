//! Bounded HTML context fragments.
//!
//! Renders a candidate node inside its local DOM context: ancestor opening
//! tags, a sibling block, the target element, then closing tags. The
//! fragment feeds the HTML-aware scorer and debugging output, so it is
//! bounded (512 whitespace tokens) and deterministic: truncation discards
//! outermost ancestors first, then extra siblings, and never splits inside
//! an element. The target element is always present in full.

use crate::descriptor::CanonicalNode;
use serde::{Deserialize, Serialize};

/// Maximum ancestors rendered around the target.
pub const MAX_DEPTH: usize = 5;

/// Maximum siblings rendered alongside the target.
pub const MAX_SIBLINGS: usize = 5;

/// Token budget for the fragment, approximated by whitespace-word count.
pub const MAX_TOKENS: usize = 512;

/// Sibling text is truncated to this many characters.
const SIBLING_TEXT_LIMIT: usize = 50;

/// Attributes rendered on fragment elements, in fixed order.
const RENDERED_ATTRS: &[&str] = &["class", "id", "role", "type", "name", "aria-label", "data-testid"];

/// A rendered context fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HtmlContext {
    /// The HTML fragment
    pub html: String,
    /// Whitespace-token count of the fragment
    pub token_count: usize,
    /// Whether the budget forced truncation
    pub truncated: bool,
}

/// Builds bounded HTML fragments around candidate nodes.
#[derive(Debug, Clone)]
pub struct HtmlContextBuilder {
    max_tokens: usize,
}

impl Default for HtmlContextBuilder {
    fn default() -> Self {
        Self {
            max_tokens: MAX_TOKENS,
        }
    }
}

impl HtmlContextBuilder {
    /// Create a builder with the default token budget.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder with a custom token budget (used in tests).
    pub fn with_max_tokens(max_tokens: usize) -> Self {
        Self { max_tokens }
    }

    /// Build the context fragment for `target` within `all_nodes`.
    pub fn build(&self, target: &CanonicalNode, all_nodes: &[CanonicalNode]) -> HtmlContext {
        let mut ancestors = find_ancestors(target, all_nodes);
        let mut siblings = find_siblings(target, all_nodes);

        let mut truncated = false;
        loop {
            let html = render(&ancestors, &siblings, target);
            let token_count = count_tokens(&html);
            if token_count <= self.max_tokens {
                return HtmlContext {
                    html,
                    token_count,
                    truncated,
                };
            }

            truncated = true;
            // Shed outermost ancestors first, then extra siblings. The
            // target itself is never dropped.
            if !ancestors.is_empty() {
                ancestors.remove(0);
            } else if !siblings.is_empty() {
                siblings.pop();
            } else {
                return HtmlContext {
                    html,
                    token_count,
                    truncated,
                };
            }
        }
    }
}

/// Ancestor placeholders for the target, root-first, capped at `MAX_DEPTH`.
///
/// Where a snapshot node matches an ancestor level (same tag at the same
/// prefix of the hierarchy path), its attributes are rendered; otherwise
/// the level renders as a bare tag.
fn find_ancestors<'a>(
    target: &CanonicalNode,
    all_nodes: &'a [CanonicalNode],
) -> Vec<AncestorLevel<'a>> {
    let path = &target.hierarchy;
    if path.is_empty() {
        return Vec::new();
    }

    let start = path.len().saturating_sub(MAX_DEPTH);
    path[start..]
        .iter()
        .enumerate()
        .map(|(offset, tag)| {
            let level = start + offset;
            let node = all_nodes.iter().find(|n| {
                n.tag.eq_ignore_ascii_case(tag)
                    && n.hierarchy.len() == level
                    && n.hierarchy[..] == path[..level]
            });
            AncestorLevel {
                tag: tag.to_lowercase(),
                node,
            }
        })
        .collect()
}

struct AncestorLevel<'a> {
    tag: String,
    node: Option<&'a CanonicalNode>,
}

/// Elements sharing the target's parent path, capped at `MAX_SIBLINGS`.
fn find_siblings<'a>(
    target: &CanonicalNode,
    all_nodes: &'a [CanonicalNode],
) -> Vec<&'a CanonicalNode> {
    if target.hierarchy.is_empty() {
        return Vec::new();
    }
    let parent_path = &target.hierarchy[..target.hierarchy.len() - 1];

    all_nodes
        .iter()
        .filter(|n| {
            n.signature != target.signature
                && n.hierarchy.len() == target.hierarchy.len()
                && n.hierarchy[..n.hierarchy.len() - 1] == *parent_path
        })
        .take(MAX_SIBLINGS)
        .collect()
}

fn render(
    ancestors: &[AncestorLevel<'_>],
    siblings: &[&CanonicalNode],
    target: &CanonicalNode,
) -> String {
    let mut out = String::new();

    for level in ancestors {
        match level.node {
            Some(node) => out.push_str(&open_tag(&level.tag, node)),
            None => out.push_str(&format!("<{}>", level.tag)),
        }
    }

    if !siblings.is_empty() {
        out.push_str("<div class=\"sibling-context\">");
        for sibling in siblings {
            out.push_str(&render_element(sibling, Some(SIBLING_TEXT_LIMIT)));
        }
        out.push_str("</div>");
    }

    out.push_str(&render_element(target, None));

    for level in ancestors.iter().rev() {
        out.push_str(&format!("</{}>", level.tag));
    }

    out
}

fn render_element(node: &CanonicalNode, text_limit: Option<usize>) -> String {
    let tag = if node.tag.is_empty() {
        "span".to_string()
    } else {
        node.tag.to_lowercase()
    };

    let text = match text_limit {
        Some(limit) => node.inner_text.chars().take(limit).collect::<String>(),
        None => node.inner_text.clone(),
    };

    format!(
        "{}{}</{}>",
        open_tag(&tag, node),
        escape_text(&text),
        tag
    )
}

fn open_tag(tag: &str, node: &CanonicalNode) -> String {
    let mut out = format!("<{}", tag);
    for name in RENDERED_ATTRS {
        if let Some(value) = node.attr(name) {
            out.push_str(&format!(" {}=\"{}\"", name, escape_attr(value)));
        }
    }
    out.push('>');
    out
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_text(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn count_tokens(html: &str) -> usize {
    html.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::CanonicalBuilder;
    use crate::snapshot::{RawNode, Snapshot};

    fn nodes_from(elements: Vec<RawNode>) -> Vec<CanonicalNode> {
        let snapshot = Snapshot::new("https://example.com", "dom", "frame", elements);
        CanonicalBuilder::new().build_all(&snapshot)
    }

    #[test]
    fn test_fragment_contains_target_and_ancestors() {
        let nodes = nodes_from(vec![
            RawNode::new("FORM", "").with_attr("id", "login-form").with_hierarchy(vec!["HTML", "BODY"]),
            RawNode::new("BUTTON", "Submit")
                .with_attr("type", "submit")
                .with_hierarchy(vec!["HTML", "BODY", "FORM"]),
        ]);

        let ctx = HtmlContextBuilder::new().build(&nodes[1], &nodes);
        assert!(ctx.html.contains("<button type=\"submit\">Submit</button>"));
        assert!(ctx.html.contains("<form id=\"login-form\">"));
        assert!(ctx.html.ends_with("</html>") || ctx.html.contains("</form>"));
        assert!(!ctx.truncated);
    }

    #[test]
    fn test_sibling_block_rendered_with_truncated_text() {
        let long_label = "y".repeat(80);
        let nodes = nodes_from(vec![
            RawNode::new("BUTTON", "Save").with_hierarchy(vec!["BODY", "DIV"]),
            RawNode::new("BUTTON", &long_label).with_hierarchy(vec!["BODY", "DIV"]),
        ]);

        let ctx = HtmlContextBuilder::new().build(&nodes[0], &nodes);
        assert!(ctx.html.contains("<div class=\"sibling-context\">"));
        // Sibling text is cut at 50 chars; the target stays complete.
        assert!(ctx.html.contains(&"y".repeat(50)));
        assert!(!ctx.html.contains(&"y".repeat(51)));
        assert!(ctx.html.contains(">Save</button>"));
    }

    #[test]
    fn test_attribute_order_fixed_and_escaped() {
        let nodes = nodes_from(vec![RawNode::new("INPUT", "")
            .with_attr("name", "q\"uote")
            .with_attr("class", "search")
            .with_attr("id", "s1")]);

        let ctx = HtmlContextBuilder::new().build(&nodes[0], &nodes);
        // class before id before name, regardless of insertion order.
        let class_pos = ctx.html.find("class=").unwrap();
        let id_pos = ctx.html.find("id=").unwrap();
        let name_pos = ctx.html.find("name=").unwrap();
        assert!(class_pos < id_pos && id_pos < name_pos);
        assert!(ctx.html.contains("q&quot;uote"));
    }

    #[test]
    fn test_truncation_sheds_ancestors_then_siblings() {
        let mut elements = vec![RawNode::new("BUTTON", "Target")
            .with_hierarchy(vec!["HTML", "BODY", "MAIN", "SECTION", "DIV"])];
        for i in 0..5 {
            elements.push(
                RawNode::new("SPAN", format!("sibling number {} with plenty of words", i))
                    .with_backend_id(i)
                    .with_hierarchy(vec!["HTML", "BODY", "MAIN", "SECTION", "DIV"]),
            );
        }
        let nodes = nodes_from(elements);

        let ctx = HtmlContextBuilder::with_max_tokens(12).build(&nodes[0], &nodes);
        assert!(ctx.truncated);
        assert!(ctx.token_count <= 12 || ctx.html.contains(">Target</button>"));
        // Target survives truncation in full.
        assert!(ctx.html.contains(">Target</button>"));
    }

    #[test]
    fn test_determinism() {
        let nodes = nodes_from(vec![
            RawNode::new("DIV", "wrapper").with_hierarchy(vec!["HTML", "BODY"]),
            RawNode::new("A", "Home").with_hierarchy(vec!["HTML", "BODY", "DIV"]),
            RawNode::new("A", "About").with_hierarchy(vec!["HTML", "BODY", "DIV"]),
        ]);

        let builder = HtmlContextBuilder::new();
        let a = builder.build(&nodes[1], &nodes);
        let b = builder.build(&nodes[1], &nodes);
        assert_eq!(a, b);
    }

    #[test]
    fn test_token_budget_respected() {
        let nodes = nodes_from(vec![
            RawNode::new("BUTTON", "Go").with_hierarchy(vec!["HTML", "BODY", "FORM"]),
        ]);
        let ctx = HtmlContextBuilder::new().build(&nodes[0], &nodes);
        assert!(ctx.token_count <= MAX_TOKENS);
    }
}
