//! Step intent parsing.
//!
//! Parses natural-language test steps into a structured `{action, target,
//! value}` intent:
//! - `Click "Login"`
//! - `Type $"John123" into "Username"`
//! - `Validate "Welcome back"`
//! - `Open https://example.com`
//! - `Wait for 2 seconds`
//!
//! Grammar patterns are tried in order; the first match wins. Unmatched
//! steps fall back to a keyword-based guess at reduced confidence.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Action a step asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Click,
    Type,
    Validate,
    Navigate,
    Wait,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Click => "click",
            Self::Type => "type",
            Self::Validate => "validate",
            Self::Navigate => "navigate",
            Self::Wait => "wait",
        };
        write!(f, "{}", s)
    }
}

/// Structured intent parsed from one step string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedIntent {
    /// The action to perform
    pub action: Action,
    /// Quoted noun the step refers to (empty for navigate/wait)
    pub target: String,
    /// Text to enter (required for `type`; duration literal for `wait`)
    pub value: Option<String>,
    /// Lower-cased alphanumeric tokens of the target, for promotion keying
    pub label_tokens: Vec<String>,
    /// Parse confidence in `[0, 1]`
    pub confidence: f64,
    /// The original step string
    pub raw_step: String,
}

impl ParsedIntent {
    /// Wait duration in milliseconds, when this is a `wait` intent.
    ///
    /// The duration literal is interpreted as seconds unless the raw step
    /// carries an `ms` unit.
    pub fn wait_ms(&self) -> Option<u64> {
        if self.action != Action::Wait {
            return None;
        }
        let amount: f64 = self.value.as_deref()?.parse().ok()?;
        let is_ms = WAIT_MS_UNIT.is_match(&self.raw_step);
        let ms = if is_ms { amount } else { amount * 1000.0 };
        Some(ms.max(0.0) as u64)
    }

    /// Render the canonical form of this intent.
    ///
    /// Parsing the rendered form yields an identical intent for steps the
    /// grammar recognises.
    pub fn canonical_step(&self) -> String {
        match self.action {
            Action::Click => format!("click \"{}\"", self.target),
            Action::Type => format!(
                "type $\"{}\" into \"{}\"",
                self.value.as_deref().unwrap_or(""),
                self.target
            ),
            Action::Validate => format!("validate \"{}\"", self.target),
            Action::Navigate => format!("navigate {}", self.target),
            Action::Wait => {
                let unit = if WAIT_MS_UNIT.is_match(&self.raw_step) {
                    "ms"
                } else {
                    "s"
                };
                format!("wait {}{}", self.value.as_deref().unwrap_or("1"), unit)
            }
        }
    }
}

/// Outcome of validating a parsed intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentValidation {
    /// Whether the intent passed all checks
    pub valid: bool,
    /// Human-readable issues, empty when valid
    pub issues: Vec<String>,
}

// Grammar patterns, tried in declaration order.
static CLICK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:click|tap|press|hit|open|choose|select|pick)\s+"([^"]+)""#)
        .expect("invalid regex")
});

static TYPE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:type|enter|fill|input|write|set)\s+\$?"([^"]+)"\s+into\s+"([^"]+)""#)
        .expect("invalid regex")
});

static VALIDATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:validate|check|verify|confirm|assert)\s+"([^"]+)""#)
        .expect("invalid regex")
});

static NAVIGATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:open|go|navigate|visit)\s+(?:to\s+)?(https?://\S+)")
        .expect("invalid regex")
});

static WAIT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:wait|pause|sleep)\s+(?:for\s+)?(\d+(?:\.\d+)?)\s*(?:ms|s|seconds?)?\b")
        .expect("invalid regex")
});

static WAIT_MS_UNIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\d\s*ms\b").expect("invalid regex")
});

// Fallback keyword tables for unmatched steps.
static TYPE_KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:type|enter|fill|input|write|set)\b").expect("invalid regex")
});

static VALIDATE_KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:validate|check|verify|confirm|assert)\b").expect("invalid regex")
});

static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]+)"|'([^']+)'"#).expect("invalid regex"));

static DOLLAR_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\$"([^"]+)"|\$(\S+)"#).expect("invalid regex"));

static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("invalid regex"));

/// Parser for extracting intent, target, and value from test steps.
#[derive(Debug, Clone, Default)]
pub struct IntentParser;

impl IntentParser {
    /// Create a new parser.
    pub fn new() -> Self {
        Self
    }

    /// Parse one step string into a structured intent.
    pub fn parse(&self, step: &str) -> ParsedIntent {
        let step = step.trim();

        if let Some(caps) = TYPE_PATTERN.captures(step) {
            let value = caps[1].to_string();
            let target = caps[2].to_string();
            return self.intent(Action::Type, target, Some(value), 0.9, step);
        }

        if let Some(caps) = CLICK_PATTERN.captures(step) {
            let target = caps[1].to_string();
            return self.intent(Action::Click, target, None, 0.9, step);
        }

        if let Some(caps) = VALIDATE_PATTERN.captures(step) {
            let target = caps[1].to_string();
            return self.intent(Action::Validate, target, None, 0.9, step);
        }

        if let Some(caps) = NAVIGATE_PATTERN.captures(step) {
            let url = caps[1].to_string();
            return self.intent(Action::Navigate, url, None, 0.9, step);
        }

        if let Some(caps) = WAIT_PATTERN.captures(step) {
            let duration = caps[1].to_string();
            return self.intent(Action::Wait, String::new(), Some(duration), 0.8, step);
        }

        self.parse_by_keywords(step)
    }

    /// Validate a parsed intent, returning issues rather than failing.
    pub fn validate(&self, intent: &ParsedIntent) -> IntentValidation {
        let mut issues = Vec::new();

        match intent.action {
            Action::Click | Action::Validate => {
                if intent.target.is_empty() {
                    issues.push(format!("action '{}' requires a target", intent.action));
                }
            }
            Action::Type => {
                if intent.target.is_empty() {
                    issues.push("action 'type' requires a target".to_string());
                }
                if intent.value.as_deref().unwrap_or("").is_empty() {
                    issues.push("action 'type' requires a value".to_string());
                }
            }
            Action::Navigate => {
                if intent.target.is_empty() {
                    issues.push("action 'navigate' requires a url".to_string());
                }
            }
            Action::Wait => {}
        }

        if intent.confidence < 0.5 {
            issues.push(format!("low confidence: {:.2}", intent.confidence));
        }

        IntentValidation {
            valid: issues.is_empty(),
            issues,
        }
    }

    /// Keyword fallback when no grammar pattern matched.
    ///
    /// Defaults to `click` with whatever quoted text is present.
    fn parse_by_keywords(&self, step: &str) -> ParsedIntent {
        let action = if TYPE_KEYWORDS.is_match(step) {
            Action::Type
        } else if VALIDATE_KEYWORDS.is_match(step) {
            Action::Validate
        } else {
            Action::Click
        };

        let value = DOLLAR_VALUE.captures(step).map(|caps| {
            caps.get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default()
        });

        // Prefer the last quoted run as the target; the first may be the
        // value in "type"-shaped steps.
        let quoted: Vec<String> = QUOTED
            .captures_iter(step)
            .filter_map(|caps| {
                caps.get(1)
                    .or_else(|| caps.get(2))
                    .map(|m| m.as_str().to_string())
            })
            .collect();

        let target = match &value {
            Some(v) => quoted
                .iter()
                .rev()
                .find(|q| *q != v)
                .cloned()
                .unwrap_or_default(),
            None => quoted.last().cloned().unwrap_or_default(),
        };

        self.intent(action, target, value, 0.6, step)
    }

    fn intent(
        &self,
        action: Action,
        target: String,
        value: Option<String>,
        confidence: f64,
        step: &str,
    ) -> ParsedIntent {
        let label_tokens = label_tokens(&target);
        ParsedIntent {
            action,
            target,
            value,
            label_tokens,
            confidence,
            raw_step: step.to_string(),
        }
    }
}

/// Lower-cased alphanumeric tokens of length ≥ 2, in source order.
pub fn label_tokens(text: &str) -> Vec<String> {
    NON_ALNUM
        .split(&text.to_lowercase())
        .filter(|t| t.len() >= 2)
        .map(|t| t.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(step: &str) -> ParsedIntent {
        IntentParser::new().parse(step)
    }

    #[test]
    fn test_parse_click() {
        let intent = parse("Click \"Login\"");
        assert_eq!(intent.action, Action::Click);
        assert_eq!(intent.target, "Login");
        assert_eq!(intent.value, None);
        assert_eq!(intent.label_tokens, vec!["login"]);
        assert!(intent.confidence >= 0.9);
    }

    #[test]
    fn test_parse_click_aliases() {
        for step in ["Tap \"Menu\"", "Press \"OK\"", "Choose \"Red\"", "Pick \"One\""] {
            assert_eq!(parse(step).action, Action::Click, "step: {}", step);
        }
    }

    #[test]
    fn test_parse_type_with_dollar_value() {
        let intent = parse("Type $\"john123\" into \"Username\"");
        assert_eq!(intent.action, Action::Type);
        assert_eq!(intent.target, "Username");
        assert_eq!(intent.value.as_deref(), Some("john123"));
        assert_eq!(intent.label_tokens, vec!["username"]);
    }

    #[test]
    fn test_parse_type_without_dollar() {
        let intent = parse("Enter \"hello world\" into \"Search\"");
        assert_eq!(intent.action, Action::Type);
        assert_eq!(intent.target, "Search");
        assert_eq!(intent.value.as_deref(), Some("hello world"));
    }

    #[test]
    fn test_parse_validate() {
        let intent = parse("Verify \"Welcome back\"");
        assert_eq!(intent.action, Action::Validate);
        assert_eq!(intent.target, "Welcome back");
        assert_eq!(intent.label_tokens, vec!["welcome", "back"]);
    }

    #[test]
    fn test_parse_navigate() {
        let intent = parse("Open https://example.com/login");
        assert_eq!(intent.action, Action::Navigate);
        assert_eq!(intent.target, "https://example.com/login");
    }

    #[test]
    fn test_open_with_quotes_is_click() {
        // "open" followed by a quoted target is a click, not a navigation.
        let intent = parse("Open \"Settings\"");
        assert_eq!(intent.action, Action::Click);
        assert_eq!(intent.target, "Settings");
    }

    #[test]
    fn test_parse_wait() {
        let intent = parse("Wait for 2 seconds");
        assert_eq!(intent.action, Action::Wait);
        assert_eq!(intent.value.as_deref(), Some("2"));
        assert_eq!(intent.wait_ms(), Some(2000));

        let intent = parse("sleep 250ms");
        assert_eq!(intent.wait_ms(), Some(250));
    }

    #[test]
    fn test_fallback_defaults_to_click() {
        let intent = parse("do something with \"Save\"");
        assert_eq!(intent.action, Action::Click);
        assert_eq!(intent.target, "Save");
        assert!((intent.confidence - 0.6).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validation_issues() {
        let parser = IntentParser::new();

        let intent = parse("click \"\" nothing");
        let validation = parser.validate(&intent);
        assert!(!validation.valid);
        assert!(validation.issues[0].contains("requires a target"));

        let mut intent = parse("Type $\"x\" into \"Field\"");
        intent.value = None;
        let validation = parser.validate(&intent);
        assert!(!validation.valid);
        assert!(validation.issues.iter().any(|i| i.contains("requires a value")));
    }

    #[test]
    fn test_validation_passes_for_wellformed() {
        let parser = IntentParser::new();
        for step in [
            "Click \"Submit\"",
            "Type $\"v\" into \"Field\"",
            "Validate \"Done\"",
            "Visit https://example.com",
            "Wait 1s",
        ] {
            let intent = parser.parse(step);
            let validation = parser.validate(&intent);
            assert!(validation.valid, "{}: {:?}", step, validation.issues);
        }
    }

    #[test]
    fn test_canonical_roundtrip() {
        let parser = IntentParser::new();
        for step in [
            "Click \"Login\"",
            "Type $\"john123\" into \"Username\"",
            "Validate \"Welcome back\"",
            "Navigate https://example.com",
        ] {
            let first = parser.parse(step);
            let second = parser.parse(&first.canonical_step());
            assert_eq!(first.action, second.action);
            assert_eq!(first.target, second.target);
            assert_eq!(first.value, second.value);
            assert_eq!(first.label_tokens, second.label_tokens);
        }
    }

    #[test]
    fn test_label_tokens_rules() {
        assert_eq!(label_tokens("Send  a Message!"), vec!["send", "message"]);
        assert_eq!(label_tokens(""), Vec::<String>::new());
        assert_eq!(label_tokens("OK"), vec!["ok"]);
    }
}
