//! Error types for Boardsync

use thiserror::Error;

/// Result type alias for Boardsync operations
pub type Result<T> = std::result::Result<T, BoardsyncError>;

/// Main error type for Boardsync
#[derive(Error, Debug)]
pub enum BoardsyncError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Store write failed after {attempts} attempts: {message}")]
    WriteExhausted { attempts: u32, message: String },

    #[error("Dashboard not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Sync error: {0}")]
    Sync(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors from the remote dashboard API.
///
/// The distinction between `Network` and `Rejected` matters: a network
/// failure takes the offline path (queue the write, replay later) while a
/// rejection is final and propagates to the caller.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Network failure: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Rejected by server (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Malformed server response: {0}")]
    Malformed(String),
}

impl RemoteError {
    /// True when the failure is a connectivity problem rather than the
    /// server refusing the request.
    pub fn is_network(&self) -> bool {
        matches!(self, RemoteError::Network(_) | RemoteError::Timeout(_))
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RemoteError::Timeout(std::time::Duration::from_secs(0))
        } else if e.is_connect() || e.is_request() {
            RemoteError::Network(e.to_string())
        } else if let Some(status) = e.status() {
            RemoteError::Rejected {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            RemoteError::Network(e.to_string())
        }
    }
}

impl BoardsyncError {
    /// Check if error is retryable via the offline queue
    pub fn is_retryable(&self) -> bool {
        match self {
            BoardsyncError::Remote(e) => e.is_network(),
            BoardsyncError::Sync(_) => true,
            _ => false,
        }
    }
}
