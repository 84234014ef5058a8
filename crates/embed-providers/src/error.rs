//! Provider error types.

use std::time::Duration;

use embed_types::FailureKind;
use thiserror::Error;

/// Errors from a remote embedding provider call.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Provider is missing required configuration (no API key, no model)
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    /// Request exceeded the client timeout
    #[error("Request timed out")]
    Timeout,

    /// Provider asked us to slow down
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited {
        /// Provider-specified delay from the Retry-After header, if any
        retry_after: Option<Duration>,
    },

    /// Transport-level failure (connect, TLS, reset)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Authentication rejected
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Response body did not match the expected shape
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// Returned vector length does not match the configured dimension
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl ProviderError {
    /// Whether a retry of the same request can reasonably succeed.
    pub fn retryable(&self) -> bool {
        match self {
            ProviderError::Timeout
            | ProviderError::RateLimited { .. }
            | ProviderError::Transport(_) => true,
            ProviderError::Http { status, .. } => *status >= 500,
            ProviderError::NotConfigured(_)
            | ProviderError::Auth(_)
            | ProviderError::Parse(_)
            | ProviderError::DimensionMismatch { .. } => false,
        }
    }

    /// Provider-specified retry delay, when the error carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Map onto the degradation taxonomy.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ProviderError::Transport(_) => FailureKind::ConnectionLost,
            ProviderError::Timeout => FailureKind::Timeout,
            ProviderError::RateLimited { .. } => FailureKind::RateLimited,
            ProviderError::NotConfigured(_) | ProviderError::Auth(_) => FailureKind::ConfigInvalid,
            ProviderError::Http { .. }
            | ProviderError::Parse(_)
            | ProviderError::DimensionMismatch { .. } => FailureKind::VectorUnavailable,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else if e.is_connect() {
            ProviderError::Transport(e.to_string())
        } else if e.is_decode() {
            ProviderError::Parse(e.to_string())
        } else {
            ProviderError::Transport(e.to_string())
        }
    }
}
