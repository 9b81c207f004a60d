//! Error types for policy management.

use thiserror::Error;

/// Errors raised while managing or loading policies.
///
/// Evaluation never fails: a condition that cannot be evaluated simply does
/// not match.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy already exists: {0}")]
    Duplicate(String),

    #[error("policy not found: {0}")]
    NotFound(String),

    #[error("invalid policy '{id}': {reason}")]
    Invalid { id: String, reason: String },

    #[error("invalid pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Why a condition could not be evaluated.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConditionError {
    #[error("missing attribute: {0}")]
    MissingAttribute(String),

    #[error("attribute '{key}' is not a string")]
    NotAString { key: String },

    #[error("condition failed: {0}")]
    Failed(String),
}
