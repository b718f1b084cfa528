//! Upload queue error types.

use thiserror::Error;

/// Upload queue error type.
#[derive(Error, Debug)]
pub enum QueueError {
    /// Invalid or incomplete queue configuration (e.g. no URL resolvable)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Durable store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Dispatch failed or the response could not be understood
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Result type alias using QueueError.
pub type QueueResult<T> = Result<T, QueueError>;

/// Durable store error type.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backend (database, filesystem) failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Record key is malformed
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

/// Result type alias using StoreError.
pub type StoreResult<T> = Result<T, StoreError>;

/// Transport error type.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Request could not be sent (connection, timeout, TLS)
    #[error("Request failed: {0}")]
    Request(String),

    /// Remote endpoint answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, for debugging.
        body: String,
    },

    /// Response body is not a recognizable acknowledgement
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// All delivery attempts failed
    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Error of the final attempt.
        last: Box<TransportError>,
    },
}

impl TransportError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::InvalidResponse(_) | Self::RetriesExhausted { .. } => false,
        }
    }
}
