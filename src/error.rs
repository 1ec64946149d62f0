//! Error types for Remora

use thiserror::Error;

/// Main error type for the memory engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The text oracle was unreachable, timed out, or returned a non-success status
    #[error("Oracle error: {0}")]
    Oracle(String),

    /// Oracle output did not follow the documented response contract
    #[error("Parse error: {0}")]
    Parse(String),

    /// Session does not exist
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Embedding generation failed
    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    /// Invalid operation
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, EngineError>;
