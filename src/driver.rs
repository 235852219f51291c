//! Browser driver seam.
//!
//! The pipeline consumes a small capability set: navigate, snapshot,
//! selector query, and the three element actions. Real browser
//! integrations implement `Driver`; `ReplayDriver` evaluates the selector
//! shapes this crate emits against a captured snapshot, for offline
//! validation and tests.

use crate::descriptor::{CanonicalBuilder, CanonicalNode};
use crate::snapshot::Snapshot;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Failures a driver call can produce.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DriverError {
    /// The action exceeded its budget
    #[error("driver action timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// The selector matched nothing actionable
    #[error("no element for selector '{selector}'")]
    NotFound { selector: String },

    /// Any other driver failure
    #[error("driver error: {0}")]
    Other(String),
}

/// Result alias for driver calls.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Result of a selector query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Number of matching nodes
    pub count: usize,
    /// Opaque handles for the matches, in document order
    pub handles: Vec<String>,
}

/// One executed driver action, as recorded by `ReplayDriver`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedAction {
    /// Action name (`click`, `fill`, `press`, `goto`)
    pub action: String,
    /// Selector or URL the action ran against
    pub target: String,
    /// Entered text or key, when applicable
    pub value: Option<String>,
}

/// Browser capability set consumed by the orchestrator.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Navigate to a URL.
    async fn goto(&self, url: &str, timeout_ms: u64) -> DriverResult<()>;

    /// Capture the current page state.
    async fn snapshot(&self) -> DriverResult<Snapshot>;

    /// Count nodes matching a selector.
    async fn query(&self, xpath: &str) -> DriverResult<QueryResult>;

    /// Click the first node matching a selector.
    async fn click(&self, xpath: &str, timeout_ms: u64) -> DriverResult<()>;

    /// Fill text into the first node matching a selector.
    async fn fill(&self, xpath: &str, text: &str, timeout_ms: u64, clear: bool)
        -> DriverResult<()>;

    /// Press a key on the first node matching a selector.
    async fn press(&self, xpath: &str, key: &str, timeout_ms: u64) -> DriverResult<()>;
}

/// Driver that replays a captured snapshot.
///
/// Evaluates the selector shapes the synthesiser emits (text predicate,
/// attribute predicate, hybrid, positional) against the snapshot's nodes.
pub struct ReplayDriver {
    snapshot: Snapshot,
    nodes: Vec<CanonicalNode>,
    log: Mutex<Vec<ExecutedAction>>,
    failing: Vec<String>,
}

impl ReplayDriver {
    /// Create a replay driver over a snapshot.
    pub fn new(snapshot: Snapshot) -> Self {
        let nodes = CanonicalBuilder::new().build_all(&snapshot);
        Self {
            snapshot,
            nodes,
            log: Mutex::new(Vec::new()),
            failing: Vec::new(),
        }
    }

    /// Mark a selector as failing on click/fill/press, for retry tests.
    pub fn with_failing_selector(mut self, selector: impl Into<String>) -> Self {
        self.failing.push(selector.into());
        self
    }

    /// Actions executed so far, in order.
    pub fn executed(&self) -> Vec<ExecutedAction> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    fn record(&self, action: &str, target: &str, value: Option<String>) {
        if let Ok(mut log) = self.log.lock() {
            log.push(ExecutedAction {
                action: action.to_string(),
                target: target.to_string(),
                value,
            });
        }
    }

    fn matches(&self, xpath: &str) -> Vec<&CanonicalNode> {
        evaluate_selector(xpath, &self.nodes)
    }

    fn act(&self, action: &str, xpath: &str, value: Option<String>) -> DriverResult<()> {
        if self.failing.iter().any(|s| s == xpath) {
            return Err(DriverError::Other(format!(
                "scripted failure for '{xpath}'"
            )));
        }
        let matches = self.matches(xpath);
        if matches.is_empty() {
            return Err(DriverError::NotFound {
                selector: xpath.to_string(),
            });
        }
        self.record(action, xpath, value);
        Ok(())
    }
}

#[async_trait]
impl Driver for ReplayDriver {
    async fn goto(&self, url: &str, _timeout_ms: u64) -> DriverResult<()> {
        self.record("goto", url, None);
        Ok(())
    }

    async fn snapshot(&self) -> DriverResult<Snapshot> {
        Ok(self.snapshot.clone())
    }

    async fn query(&self, xpath: &str) -> DriverResult<QueryResult> {
        let matches = self.matches(xpath);
        Ok(QueryResult {
            count: matches.len(),
            handles: matches
                .iter()
                .map(|n| {
                    n.backend_node_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| n.signature.clone())
                })
                .collect(),
        })
    }

    async fn click(&self, xpath: &str, _timeout_ms: u64) -> DriverResult<()> {
        self.act("click", xpath, None)
    }

    async fn fill(
        &self,
        xpath: &str,
        text: &str,
        _timeout_ms: u64,
        _clear: bool,
    ) -> DriverResult<()> {
        self.act("fill", xpath, Some(text.to_string()))
    }

    async fn press(&self, xpath: &str, key: &str, _timeout_ms: u64) -> DriverResult<()> {
        self.act("press", xpath, Some(key.to_string()))
    }
}

/// Evaluate one emitted selector shape against canonical nodes.
fn evaluate_selector<'a>(xpath: &str, nodes: &'a [CanonicalNode]) -> Vec<&'a CanonicalNode> {
    let Some(body) = xpath.strip_prefix("//") else {
        return Vec::new();
    };

    // //parent/tag[index] — only a slash before any predicate counts as a
    // step separator; slashes inside literals do not.
    let bracket = body.find('[').unwrap_or(body.len());
    if let Some(slash) = body[..bracket].find('/') {
        let parent = &body[..slash];
        let rest = &body[slash + 1..];
        let (tag, index) = split_index(rest);
        let group: Vec<&CanonicalNode> = nodes
            .iter()
            .filter(|n| {
                n.tag.eq_ignore_ascii_case(tag) && n.parent_tag.eq_ignore_ascii_case(parent)
            })
            .collect();
        return match index {
            Some(i) if i >= 1 && i <= group.len() => vec![group[i - 1]],
            Some(_) => Vec::new(),
            None => group,
        };
    }

    // //tag[...]
    let (tag, predicate) = match body.find('[') {
        Some(pos) if body.ends_with(']') => (&body[..pos], Some(&body[pos + 1..body.len() - 1])),
        _ => (body, None),
    };

    let tagged: Vec<&CanonicalNode> = nodes
        .iter()
        .filter(|n| n.tag.eq_ignore_ascii_case(tag))
        .collect();

    let Some(predicate) = predicate else {
        return tagged;
    };

    // //tag[index]
    if let Ok(i) = predicate.parse::<usize>() {
        return if i >= 1 && i <= tagged.len() {
            vec![tagged[i - 1]]
        } else {
            Vec::new()
        };
    }

    tagged
        .into_iter()
        .filter(|n| split_clauses(predicate).iter().all(|c| matches_clause(n, c)))
        .collect()
}

/// Split a hybrid predicate into clauses.
///
/// The synthesiser only ever joins a text clause with one attribute
/// clause, so splitting at the last `" and @"` keeps literals containing
/// the word "and" intact.
fn split_clauses(predicate: &str) -> Vec<&str> {
    match predicate.rfind(" and @") {
        Some(pos) => vec![&predicate[..pos], &predicate[pos + 5..]],
        None => vec![predicate],
    }
}

fn matches_clause(node: &CanonicalNode, clause: &str) -> bool {
    let clause = clause.trim();

    if let Some(rest) = clause.strip_prefix("normalize-space()=") {
        return parse_literal(rest)
            .map(|text| normalize_space(&node.inner_text) == text)
            .unwrap_or(false);
    }

    if let Some(rest) = clause.strip_prefix('@') {
        if let Some((attr, value)) = rest.split_once('=') {
            return parse_literal(value)
                .map(|v| node.attr(attr) == Some(v.as_str()))
                .unwrap_or(false);
        }
    }

    false
}

fn split_index(segment: &str) -> (&str, Option<usize>) {
    match segment.find('[') {
        Some(pos) if segment.ends_with(']') => {
            let index = segment[pos + 1..segment.len() - 1].parse().ok();
            (&segment[..pos], index)
        }
        _ => (segment, None),
    }
}

/// Parse an XPath string literal: `'...'`, `"..."`, or `concat(...)`.
fn parse_literal(raw: &str) -> Option<String> {
    let raw = raw.trim();

    if let Some(inner) = raw
        .strip_prefix("concat(")
        .and_then(|r| r.strip_suffix(')'))
    {
        let mut out = String::new();
        let mut rest = inner;
        while !rest.is_empty() {
            let quote = rest.chars().next()?;
            if quote != '\'' && quote != '"' {
                return None;
            }
            let end = rest[1..].find(quote)? + 1;
            out.push_str(&rest[1..end]);
            rest = rest[end + 1..].trim_start_matches(',').trim_start();
        }
        return Some(out);
    }

    if raw.len() >= 2 {
        let first = raw.chars().next()?;
        if (first == '\'' || first == '"') && raw.ends_with(first) {
            return Some(raw[1..raw.len() - 1].to_string());
        }
    }
    None
}

fn normalize_space(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::RawNode;

    fn snapshot() -> Snapshot {
        Snapshot::new(
            "https://example.com/login",
            "dom-1",
            "frame-1",
            vec![
                RawNode::new("BUTTON", "Submit")
                    .with_backend_id(1)
                    .with_hierarchy(vec!["HTML", "BODY", "FORM"]),
                RawNode::new("INPUT", "")
                    .with_attr("name", "user")
                    .with_attr("placeholder", "Username")
                    .with_backend_id(2)
                    .with_hierarchy(vec!["HTML", "BODY", "FORM"]),
                RawNode::new("BUTTON", "Cancel")
                    .with_backend_id(3)
                    .with_hierarchy(vec!["HTML", "BODY", "FORM"]),
            ],
        )
    }

    #[tokio::test]
    async fn test_query_text_predicate() {
        let driver = ReplayDriver::new(snapshot());
        let result = driver
            .query("//button[normalize-space()='Submit']")
            .await
            .unwrap();
        assert_eq!(result.count, 1);
        assert_eq!(result.handles, vec!["1"]);
    }

    #[tokio::test]
    async fn test_query_attribute_predicate() {
        let driver = ReplayDriver::new(snapshot());
        let result = driver.query("//input[@name='user']").await.unwrap();
        assert_eq!(result.count, 1);
        assert_eq!(result.handles, vec!["2"]);
    }

    #[tokio::test]
    async fn test_query_hybrid_predicate() {
        let driver = ReplayDriver::new(snapshot());
        let result = driver
            .query("//button[normalize-space()='Submit' and @name='user']")
            .await
            .unwrap();
        assert_eq!(result.count, 0);
    }

    #[tokio::test]
    async fn test_query_positional() {
        let driver = ReplayDriver::new(snapshot());
        let result = driver.query("//form/button[2]").await.unwrap();
        assert_eq!(result.count, 1);
        assert_eq!(result.handles, vec!["3"]);

        let result = driver.query("//form/button[9]").await.unwrap();
        assert_eq!(result.count, 0);
    }

    #[tokio::test]
    async fn test_query_bare_tag_index() {
        let driver = ReplayDriver::new(snapshot());
        assert_eq!(driver.query("//button[1]").await.unwrap().count, 1);
        assert_eq!(driver.query("//button").await.unwrap().count, 2);
    }

    #[tokio::test]
    async fn test_click_records_action() {
        let driver = ReplayDriver::new(snapshot());
        driver
            .click("//button[normalize-space()='Submit']", 10_000)
            .await
            .unwrap();

        let executed = driver.executed();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].action, "click");
    }

    #[tokio::test]
    async fn test_click_missing_is_not_found() {
        let driver = ReplayDriver::new(snapshot());
        let err = driver
            .click("//button[normalize-space()='Nope']", 10_000)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::NotFound { .. }));
        assert!(driver.executed().is_empty());
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let driver =
            ReplayDriver::new(snapshot()).with_failing_selector("//button[normalize-space()='Submit']");
        let err = driver
            .click("//button[normalize-space()='Submit']", 10_000)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Other(_)));
    }

    #[tokio::test]
    async fn test_fill_records_value() {
        let driver = ReplayDriver::new(snapshot());
        driver
            .fill("//input[@name='user']", "john123", 10_000, true)
            .await
            .unwrap();

        let executed = driver.executed();
        assert_eq!(executed[0].action, "fill");
        assert_eq!(executed[0].value.as_deref(), Some("john123"));
    }

    #[test]
    fn test_parse_literal_forms() {
        assert_eq!(parse_literal("'plain'").as_deref(), Some("plain"));
        assert_eq!(parse_literal("\"it's\"").as_deref(), Some("it's"));
        assert_eq!(
            parse_literal("concat('say \"hi\" it',\"'\",'s')").as_deref(),
            Some("say \"hi\" it's")
        );
        assert_eq!(parse_literal("unquoted"), None);
    }
}
