//! Relative XPath synthesis.
//!
//! Builds the most robust relative selector for a canonical node.
//! Strategies are tried in order (text, stable attribute, hybrid,
//! positional); the first candidate passing the syntax check wins.
//! Attribute values that look machine-generated (timestamps, hashes,
//! framework ids) are rejected so selectors survive page reloads.

use crate::descriptor::CanonicalNode;
use crate::error::{Error, Result};
use regex::Regex;
use std::sync::LazyLock;

/// Text longer than this is not used in a text predicate.
const MAX_TEXT_PREDICATE_LEN: usize = 100;

/// Attributes usable in selectors, most stable first.
const STABLE_ATTRIBUTES: &[&str] = &["id", "data-testid", "name", "aria-label", "title"];

// Value shapes that change across page loads.
static TIMESTAMP_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{13,}").expect("invalid regex"));
static HASH_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-f0-9]{8,}").expect("invalid regex"));
static REACT_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"react-\d+").expect("invalid regex"));
static GENERATED_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"__.+__").expect("invalid regex"));

/// Builds relative XPath selectors for canonical nodes.
#[derive(Debug, Clone, Default)]
pub struct XPathSynthesizer;

impl XPathSynthesizer {
    /// Create a synthesiser.
    pub fn new() -> Self {
        Self
    }

    /// Build the best selector for a node.
    ///
    /// Tries text, stable attribute, hybrid, then positional; returns the
    /// first candidate that passes validation.
    pub fn build(&self, node: &CanonicalNode) -> Result<String> {
        if node.tag.is_empty() {
            return Err(Error::XPathGeneration(
                "cannot build selector for a text node".to_string(),
            ));
        }

        let candidates = [
            self.text_based(node),
            self.attribute_based(node),
            self.hybrid(node),
            Some(self.positional(node)),
        ];

        for candidate in candidates.into_iter().flatten() {
            if validate(&candidate).is_ok() {
                return Ok(candidate);
            }
        }

        Err(Error::XPathGeneration(format!(
            "no strategy produced a valid selector for <{}>",
            node.tag.to_lowercase()
        )))
    }

    /// Build up to `max` alternative selectors, primary first.
    ///
    /// Alternatives are deduplicated and individually validated so the
    /// orchestrator can retry down the list.
    pub fn alternatives(&self, node: &CanonicalNode, max: usize) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();

        let candidates = [
            self.text_based(node),
            self.attribute_based(node),
            self.hybrid(node),
            Some(self.positional(node)),
        ];

        for candidate in candidates.into_iter().flatten() {
            if out.len() >= max {
                break;
            }
            if validate(&candidate).is_ok() && !out.contains(&candidate) {
                out.push(candidate);
            }
        }

        out
    }

    /// `//tag[normalize-space()='text']`
    fn text_based(&self, node: &CanonicalNode) -> Option<String> {
        let text = node.inner_text.trim();
        if text.is_empty() || text.chars().count() > MAX_TEXT_PREDICATE_LEN {
            return None;
        }
        Some(format!(
            "//{}[normalize-space()={}]",
            node.tag.to_lowercase(),
            xpath_literal(text)
        ))
    }

    /// `//tag[@attr='value']` with the first stable attribute.
    fn attribute_based(&self, node: &CanonicalNode) -> Option<String> {
        let (attr, value) = self.first_stable_attribute(node)?;
        Some(format!(
            "//{}[@{}={}]",
            node.tag.to_lowercase(),
            attr,
            xpath_literal(value)
        ))
    }

    /// Text and one stable attribute combined with `and`.
    fn hybrid(&self, node: &CanonicalNode) -> Option<String> {
        let text = node.inner_text.trim();
        if text.is_empty() || text.chars().count() > MAX_TEXT_PREDICATE_LEN {
            return None;
        }
        let (attr, value) = self.first_stable_attribute(node)?;
        Some(format!(
            "//{}[normalize-space()={} and @{}={}]",
            node.tag.to_lowercase(),
            xpath_literal(text),
            attr,
            xpath_literal(value)
        ))
    }

    /// `//parent/tag[index]`, falling back to `//tag[1]` without parent
    /// context. The index always disambiguates.
    fn positional(&self, node: &CanonicalNode) -> String {
        let tag = node.tag.to_lowercase();
        let index = node.siblings_count.max(1);

        if node.parent_tag.is_empty() {
            format!("//{}[1]", tag)
        } else {
            format!("//{}/{}[{}]", node.parent_tag.to_lowercase(), tag, index)
        }
    }

    fn first_stable_attribute<'a>(&self, node: &'a CanonicalNode) -> Option<(&'static str, &'a str)> {
        STABLE_ATTRIBUTES.iter().find_map(|attr| {
            node.attr(attr)
                .filter(|v| is_stable_value(v))
                .map(|v| (*attr, v))
        })
    }
}

/// Whether an attribute value is stable across page loads.
pub fn is_stable_value(value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    !(TIMESTAMP_VALUE.is_match(value)
        || HASH_VALUE.is_match(value)
        || REACT_VALUE.is_match(value)
        || GENERATED_VALUE.is_match(value))
}

/// Basic syntax validation for emitted selectors.
///
/// A valid selector starts with `//`, has balanced brackets and
/// parentheses, and contains no inner `//`.
pub fn validate(xpath: &str) -> std::result::Result<(), String> {
    if xpath.is_empty() {
        return Err("empty selector".to_string());
    }
    if !xpath.starts_with("//") {
        return Err("selector must start with //".to_string());
    }
    if xpath[2..].contains("//") {
        return Err("inner // not allowed in a relative selector".to_string());
    }
    if xpath.matches('[').count() != xpath.matches(']').count() {
        return Err("unbalanced brackets".to_string());
    }
    if xpath.matches('(').count() != xpath.matches(')').count() {
        return Err("unbalanced parentheses".to_string());
    }
    Ok(())
}

/// Render a string as an XPath literal.
///
/// Prefers single quotes; switches to double quotes when the value holds a
/// single quote, and to `concat(...)` when it holds both.
pub fn xpath_literal(value: &str) -> String {
    let has_single = value.contains('\'');
    let has_double = value.contains('"');

    match (has_single, has_double) {
        (false, _) => format!("'{}'", value),
        (true, false) => format!("\"{}\"", value),
        (true, true) => {
            let mut parts = Vec::new();
            for (i, segment) in value.split('\'').enumerate() {
                if i > 0 {
                    parts.push("\"'\"".to_string());
                }
                if !segment.is_empty() {
                    parts.push(format!("'{}'", segment));
                }
            }
            format!("concat({})", parts.join(","))
        }
    }
}
