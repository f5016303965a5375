//! Centralized error types for docgraph.

use thiserror::Error;

/// Main error type for docgraph core operations.
#[derive(Error, Debug)]
pub enum DocGraphError {
    #[error("Credentials unavailable: {0}")]
    CredentialsUnavailable(String),

    #[error("Interactive credential prompt required")]
    PromptRequired,

    #[error("Document source error: {0}")]
    Source(String),

    #[error("Mapping not found: {kind} '{name}'")]
    MappingNotFound { kind: String, name: String },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("History store error: {0}")]
    History(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for docgraph core operations.
pub type DocGraphResult<T> = Result<T, DocGraphError>;

impl DocGraphError {
    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    /// Create a document source error.
    pub fn source(msg: impl Into<String>) -> Self {
        Self::Source(msg.into())
    }
}
