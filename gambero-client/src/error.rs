//! Client error types

use thiserror::Error;

/// Client error type
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection-level failure (dial, read, write)
    #[error("Connection error: {0}")]
    Connection(String),

    /// No token available; connect refused without entering a retry loop
    #[error("No token available")]
    TokenMissing,

    /// Server rejected the credential or revoked it mid-session
    #[error("Rejected by server: {0}")]
    Rejected(String),

    /// Protocol violation (unexpected frame, version mismatch)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Operation timed out
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<shared::error::AppError> for ClientError {
    fn from(e: shared::error::AppError) -> Self {
        ClientError::Connection(e.to_string())
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
