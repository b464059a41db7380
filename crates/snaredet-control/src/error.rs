//! Error types for the broadcaster and server
use thiserror::Error;

/// Broadcaster and server errors
#[derive(Error, Debug)]
pub enum ControlError {
    /// HTTP or WebSocket server error
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// I/O error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Invalid parameter value
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result type for control operations
pub type Result<T> = std::result::Result<T, ControlError>;
