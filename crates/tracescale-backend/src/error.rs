//! Error types for trace backend calls.

use std::time::Duration;

use thiserror::Error;

pub type BackendResult<T> = Result<T, BackendError>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("trace not found: {0}")]
    NotFound(String),

    /// The search window held fewer traces than requested.
    #[error("requested {requested} traces but only {received} were received")]
    InsufficientResults { requested: usize, received: usize },

    #[error("http error: {0}")]
    Http(String),

    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid uri {0}")]
    InvalidUri(String),
}
