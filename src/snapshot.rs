//! DOM snapshot input model.
//!
//! A `Snapshot` is the captured page state a step runs against: an ordered
//! (pre-order) list of raw nodes plus page identity hashes. Snapshots are
//! immutable for the duration of one step.
//!
//! Driver payloads carry element attributes either as a mapping or as a
//! flat `[k0, v0, k1, v1, ...]` sequence; `RawAttributes` absorbs both
//! shapes at the deserialisation boundary so downstream code sees one
//! representation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A captured page state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Page URL at capture time
    #[serde(default)]
    pub url: String,
    /// Opaque digest of the DOM content
    #[serde(default)]
    pub dom_hash: String,
    /// Opaque identifier of the main browsing context
    #[serde(default)]
    pub frame_hash: String,
    /// Nodes in DOM pre-order
    #[serde(default)]
    pub elements: Vec<RawNode>,
}

impl Snapshot {
    /// Create a snapshot from parts.
    pub fn new(
        url: impl Into<String>,
        dom_hash: impl Into<String>,
        frame_hash: impl Into<String>,
        elements: Vec<RawNode>,
    ) -> Self {
        Self {
            url: url.into(),
            dom_hash: dom_hash.into(),
            frame_hash: frame_hash.into(),
            elements,
        }
    }
}

/// One DOM node as captured by the driver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawNode {
    /// Upper-case tag name; `#text` for text nodes
    #[serde(default)]
    pub tag: String,
    /// Inner text, whitespace-normalised by the builder
    #[serde(default)]
    pub text: String,
    /// Element attributes (mapping or flat sequence on the wire)
    #[serde(default)]
    pub attributes: RawAttributes,
    /// Whether the node was visible at capture time
    #[serde(default = "default_true")]
    pub visible: bool,
    /// Whether the driver flagged the node interactive
    #[serde(default)]
    pub interactive: bool,
    /// Whether the node sits below the initial viewport
    #[serde(default)]
    pub below_fold: bool,
    /// Opaque stable id assigned by the driver; may be missing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_node_id: Option<i64>,
    /// Node metadata
    #[serde(default)]
    pub meta: NodeMeta,
    /// Ancestor tag tokens, root-first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hierarchy: Option<Vec<String>>,
    /// Driver-provided XPath hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xpath: Option<String>,
    /// Accessibility-tree data, when captured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessibility: Option<Accessibility>,
}

fn default_true() -> bool {
    true
}

impl RawNode {
    /// Create a node with a tag and text; remaining fields default.
    pub fn new(tag: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    /// Set an attribute, normalising to the mapping shape.
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Set the backend node id.
    pub fn with_backend_id(mut self, id: i64) -> Self {
        self.backend_node_id = Some(id);
        self
    }

    /// Set the ancestor hierarchy path, root-first.
    pub fn with_hierarchy(mut self, path: Vec<&str>) -> Self {
        self.hierarchy = Some(path.into_iter().map(str::to_string).collect());
        self
    }

    /// Mark the node invisible.
    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    /// Whether this is a text node.
    pub fn is_text_node(&self) -> bool {
        self.tag.eq_ignore_ascii_case("#text")
    }
}

/// Node metadata carried alongside the element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMeta {
    /// Browsing context this node belongs to
    #[serde(default)]
    pub frame_hash: String,
}

/// Accessibility-tree properties for a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Accessibility {
    /// Computed accessibility role
    #[serde(default)]
    pub role: String,
    /// Computed accessible name
    #[serde(default)]
    pub name: String,
}

/// Element attributes, accepting both wire shapes.
///
/// Deserialises from either `{"id": "x", "class": "y"}` or
/// `["id", "x", "class", "y"]`; in-memory representation is always the
/// sorted mapping, so iteration order is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RawAttributes(BTreeMap<String, String>);

impl RawAttributes {
    /// Empty attribute set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an attribute value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Whether the attribute is present.
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Insert an attribute.
    pub fn insert(&mut self, key: String, value: String) {
        self.0.insert(key, value);
    }

    /// Iterate attributes in sorted key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for RawAttributes {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Map(BTreeMap<String, serde_json::Value>),
            Flat(Vec<serde_json::Value>),
        }

        fn scalar_to_string(v: &serde_json::Value) -> String {
            match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            }
        }

        let mut out = BTreeMap::new();
        match Wire::deserialize(deserializer)? {
            Wire::Map(map) => {
                for (k, v) in map {
                    out.insert(k, scalar_to_string(&v));
                }
            }
            Wire::Flat(items) => {
                for pair in items.chunks(2) {
                    if let [k, v] = pair {
                        out.insert(scalar_to_string(k), scalar_to_string(v));
                    }
                }
            }
        }
        Ok(Self(out))
    }
}

impl FromIterator<(String, String)> for RawAttributes {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_attributes_from_map() {
        let node: RawNode = serde_json::from_str(
            r#"{"tag": "INPUT", "attributes": {"id": "user", "type": "text"}}"#,
        )
        .unwrap();
        assert_eq!(node.attributes.get("id"), Some("user"));
        assert_eq!(node.attributes.get("type"), Some("text"));
    }

    #[test]
    fn test_attributes_from_flat_list() {
        let node: RawNode = serde_json::from_str(
            r#"{"tag": "INPUT", "attributes": ["id", "user", "type", "text"]}"#,
        )
        .unwrap();
        assert_eq!(node.attributes.get("id"), Some("user"));
        assert_eq!(node.attributes.get("type"), Some("text"));
    }

    #[test]
    fn test_flat_list_odd_trailing_key_dropped() {
        let node: RawNode =
            serde_json::from_str(r#"{"tag": "A", "attributes": ["href", "/x", "dangling"]}"#)
                .unwrap();
        assert_eq!(node.attributes.get("href"), Some("/x"));
        assert_eq!(node.attributes.len(), 1);
    }

    #[test]
    fn test_both_shapes_yield_equal_attributes() {
        let a: RawNode =
            serde_json::from_str(r#"{"tag": "A", "attributes": {"b": "2", "a": "1"}}"#).unwrap();
        let b: RawNode =
            serde_json::from_str(r#"{"tag": "A", "attributes": ["a", "1", "b", "2"]}"#).unwrap();
        assert_eq!(a.attributes, b.attributes);
    }

    #[test]
    fn test_visible_defaults_true() {
        let node: RawNode = serde_json::from_str(r#"{"tag": "BUTTON"}"#).unwrap();
        assert!(node.visible);
        assert!(!node.interactive);
        assert_eq!(node.backend_node_id, None);
    }

    #[test]
    fn test_numeric_attribute_values_stringified() {
        let node: RawNode =
            serde_json::from_str(r#"{"tag": "INPUT", "attributes": {"tabindex": 3}}"#).unwrap();
        assert_eq!(node.attributes.get("tabindex"), Some("3"));
    }

    #[test]
    fn test_builder_helpers() {
        let node = RawNode::new("BUTTON", "Save")
            .with_attr("id", "save-btn")
            .with_backend_id(42)
            .with_hierarchy(vec!["HTML", "BODY", "FORM"]);

        assert_eq!(node.attributes.get("id"), Some("save-btn"));
        assert_eq!(node.backend_node_id, Some(42));
        assert_eq!(
            node.hierarchy.as_deref(),
            Some(&["HTML".to_string(), "BODY".to_string(), "FORM".to_string()][..])
        );
        assert!(!node.is_text_node());
        assert!(RawNode::new("#text", "hi").is_text_node());
    }
}
