//! Error types for the sync layer.

use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The session token was rejected (401). Triggers one re-login and retry.
    #[error("authorization expired")]
    AuthExpired,

    /// The remote asked us to slow down (429).
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Duration },

    /// The addressed record does not exist on the remote.
    #[error("not found: {0}")]
    NotFound(String),

    /// The remote failed its health check.
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    /// The request itself is ambiguous or invalid. Never retried.
    #[error("validation conflict: {0}")]
    ValidationConflict(String),

    /// Any other non-success HTTP status.
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },

    /// Network error.
    #[error("network error: {0}")]
    Network(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid or unreadable configuration.
    #[error("config error: {0}")]
    Config(String),

    /// A signed envelope failed verification.
    #[error("signature error: {0}")]
    Signature(String),

    /// Entity-type schema is inconsistent (cycle, undeclared dependency).
    #[error("schema error: {0}")]
    Schema(String),

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// Login failed.
    #[error("authentication error: {0}")]
    Auth(String),
}

impl SyncError {
    /// Whether this is a rate-limit response.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Whether the remote reported the record missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_)) || matches!(self, Self::Http { status: 404, .. })
    }

    /// Status code reported in a `SyncOutcome` when this error ends an operation.
    pub fn status(&self) -> u16 {
        match self {
            Self::AuthExpired | Self::Auth(_) => 401,
            Self::RateLimited { .. } => 429,
            Self::NotFound(_) => 404,
            Self::Unavailable(_) => 503,
            Self::ValidationConflict(_) | Self::Serialization(_) => 400,
            Self::Http { status, .. } => *status,
            Self::Timeout => 504,
            Self::Network(_)
            | Self::Config(_)
            | Self::Signature(_)
            | Self::Schema(_) => 500,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl From<storesync_types::Error> for SyncError {
    fn from(e: storesync_types::Error) -> Self {
        match e {
            storesync_types::Error::Serialization(e) => Self::Serialization(e),
            other => Self::Schema(other.to_string()),
        }
    }
}
