//! Error types for heliograph-core

use thiserror::Error;

/// Main error type for the heliograph-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Local state storage error
    #[error("storage error: {0}")]
    Storage(String),

    /// Transport/collector error
    #[error("transport error: {0}")]
    Transport(String),
}

/// Result type alias for heliograph-core
pub type Result<T> = std::result::Result<T, Error>;
