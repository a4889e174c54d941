//! Polling error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PollError {
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Invalid response body: {0}")]
    InvalidBody(String),

    #[error("Invalid poll endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },
}

pub type PollResult<T> = Result<T, PollError>;
