//! Error types for the Vega engine

use thiserror::Error;

use crate::pipeline::ValidationReport;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while configuring or running a pipeline
#[derive(Debug, Error)]
pub enum EngineError {
    /// Pre-flight contract validation failed; nothing was executed
    #[error("pipeline validation failed:\n{0}")]
    Validation(ValidationReport),

    /// A requested store, product, run, or group does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// A configuration key is absent from every layer
    #[error("configuration key '{0}' not found in profile, config, or defaults")]
    MissingKey(String),

    /// A configuration document could not be read or parsed
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Filesystem error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Create a NotFound error from anything printable
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::MissingKey(_))
    }
}
