//! Error types for provider clients

use thiserror::Error;
use xcheck_core::{AgentFailure, FailureKind};

/// Errors raised while talking to a provider API
#[derive(Error, Debug)]
pub enum ClientError {
    /// API key missing or rejected (HTTP 401/403)
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Provider throttled the request (HTTP 429)
    #[error("rate limited: {0}")]
    RateLimit(String),

    /// Request exceeded its deadline
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Response body was not the JSON object we asked for
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Connection, TLS or other transport failure
    #[error("HTTP error: {0}")]
    Transport(String),

    /// Any other non-success status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ClientError::Auth(_) => FailureKind::Auth,
            ClientError::RateLimit(_) => FailureKind::RateLimit,
            ClientError::Timeout(_) => FailureKind::Timeout,
            ClientError::InvalidResponse(_) => FailureKind::InvalidResponse,
            ClientError::Transport(_) | ClientError::Status { .. } => FailureKind::Transport,
        }
    }

    /// Rejected credentials never succeed on a second attempt.
    pub fn retryable(&self) -> bool {
        !matches!(self, ClientError::Auth(_))
    }

    pub fn into_failure(self) -> AgentFailure {
        AgentFailure::new(self.kind(), self.to_string())
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout(err.to_string())
        } else if err.is_decode() {
            ClientError::InvalidResponse(err.to_string())
        } else {
            ClientError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::InvalidResponse(err.to_string())
    }
}
