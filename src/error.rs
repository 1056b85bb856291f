//! Error types for the pathway-daa library.

use thiserror::Error;

/// Main error type for the library.
#[derive(Error, Debug)]
pub enum DaaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    /// Malformed or empty tables, mismatched sample IDs, bad parameters.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A multi-level group was given to a method that needs a fixed baseline.
    #[error(
        "Group column '{column}' has {} levels ({}); a reference level is required",
        .levels.len(),
        .levels.join(", ")
    )]
    AmbiguousReference { column: String, levels: Vec<String> },

    /// The statistical backend could not produce results.
    #[error("{method} failed: {reason}")]
    MethodFailure { method: String, reason: String },

    /// Pathway lookup failed. Only ever reported as an annotation warning.
    #[error("Annotation lookup failed: {0}")]
    AnnotationLookup(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Plot error: {0}")]
    Plot(String),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DaaError {
    /// Shorthand for an [`DaaError::InvalidInput`] error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Shorthand for a [`DaaError::MethodFailure`] error.
    pub fn method(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MethodFailure {
            method: method.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, DaaError>;
