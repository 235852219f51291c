//! Error types for her-core.

use thiserror::Error;

/// Result type alias using her-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline stages, used to annotate where an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Parse,
    CheckPromotion,
    Match,
    Rerank,
    Synth,
    Execute,
    Record,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Parse => "parse",
            Self::CheckPromotion => "check_promotion",
            Self::Match => "match",
            Self::Rerank => "rerank",
            Self::Synth => "synth",
            Self::Execute => "execute",
            Self::Record => "record",
        };
        write!(f, "{}", s)
    }
}

/// Errors that can occur during a retrieval step.
#[derive(Error, Debug)]
pub enum Error {
    /// Step string failed to parse or validate
    #[error("Invalid intent: {}", .issues.join("; "))]
    InvalidIntent { issues: Vec<String> },

    /// No matching candidate after all fallbacks
    #[error("Element not found for target '{target}'")]
    ElementNotFound {
        target: String,
        suggestions: Vec<String>,
    },

    /// No strategy produced a valid selector for the chosen candidate
    #[error("XPath generation failed: {0}")]
    XPathGeneration(String),

    /// Driver failed on a valid selector
    #[error("Execution failed for selector '{selector}': {message}")]
    Execution { selector: String, message: String },

    /// Per-action budget exceeded
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// SQL integrity or deserialisation failure in a cache table
    #[error("Cache corruption: {0}")]
    CacheCorruption(String),

    /// Storage error outside the corruption path
    #[error("Storage error: {0}")]
    Storage(String),

    /// Embedder call failed
    #[error("Embedder error: {model} - {message}")]
    Embedder { model: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An error annotated with the pipeline stage it occurred in
    #[error("[{stage}] {source}")]
    Staged {
        stage: Stage,
        #[source]
        source: Box<Error>,
    },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an invalid-intent error from validation issues.
    pub fn invalid_intent(issues: Vec<String>) -> Self {
        Self::InvalidIntent { issues }
    }

    /// Create an element-not-found error with did-you-mean suggestions.
    pub fn element_not_found(target: impl Into<String>, suggestions: Vec<String>) -> Self {
        Self::ElementNotFound {
            target: target.into(),
            suggestions,
        }
    }

    /// Create an execution error.
    pub fn execution(selector: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            selector: selector.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create an embedder error.
    pub fn embedder(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Embedder {
            model: model.into(),
            message: message.into(),
        }
    }

    /// Annotate this error with the stage it occurred in.
    ///
    /// Already-staged errors keep their original stage.
    pub fn at_stage(self, stage: Stage) -> Self {
        match self {
            staged @ Self::Staged { .. } => staged,
            other => Self::Staged {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The stage annotation, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Staged { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Short kind tag for structured results.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidIntent { .. } => "invalid_intent",
            Self::ElementNotFound { .. } => "element_not_found",
            Self::XPathGeneration(_) => "xpath_generation",
            Self::Execution { .. } => "execution",
            Self::Timeout { .. } => "timeout",
            Self::CacheCorruption(_) => "cache_corruption",
            Self::Storage(_) => "storage",
            Self::Embedder { .. } => "embedder",
            Self::Config(_) => "config",
            Self::Serialization(_) => "serialization",
            Self::Staged { source, .. } => source.kind(),
            Self::Internal(_) => "internal",
        }
    }

    /// Process exit code when surfaced from a CLI wrapper.
    ///
    /// 1 = invalid intent or unrecoverable driver error, 2 = model/cache
    /// initialisation failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Storage(_) | Self::CacheCorruption(_) => 2,
            Self::Staged { source, .. } => source.exit_code(),
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_annotation() {
        let err = Error::timeout(5000).at_stage(Stage::Execute);
        assert_eq!(err.stage(), Some(Stage::Execute));
        assert_eq!(err.kind(), "timeout");

        // Re-annotating keeps the original stage.
        let err = err.at_stage(Stage::Record);
        assert_eq!(err.stage(), Some(Stage::Execute));
    }

    #[test]
    fn test_kind_tags() {
        assert_eq!(
            Error::element_not_found("Login", vec![]).kind(),
            "element_not_found"
        );
        assert_eq!(Error::invalid_intent(vec![]).kind(), "invalid_intent");
        assert_eq!(
            Error::XPathGeneration("no tag".into()).kind(),
            "xpath_generation"
        );
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            Error::invalid_intent(vec!["no action".into()]).exit_code(),
            1
        );
        assert_eq!(Error::Config("bad cache dir".into()).exit_code(), 2);
        assert_eq!(
            Error::Storage("locked".into())
                .at_stage(Stage::Record)
                .exit_code(),
            2
        );
    }

    #[test]
    fn test_display_includes_stage() {
        let err = Error::execution("//button", "detached node").at_stage(Stage::Execute);
        let msg = err.to_string();
        assert!(msg.contains("[execute]"));
        assert!(msg.contains("//button"));
    }
}
