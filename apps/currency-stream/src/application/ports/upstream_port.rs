//! Upstream Source Port (Driven Port)
//!
//! Interface for fetching the current rate snapshot from the remote source.

use async_trait::async_trait;

use crate::domain::quote::UpstreamPayload;

/// Upstream fetch errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// The request exceeded its timeout.
    #[error("upstream request timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured timeout.
        timeout_ms: u64,
    },

    /// The source answered with a non-success status.
    #[error("upstream returned HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// Connection-level failure.
    #[error("upstream transport error: {message}")]
    Transport {
        /// Transport error text.
        message: String,
    },

    /// The body was not a valid payload.
    #[error("upstream payload parse error: {message}")]
    Parse {
        /// Parse error text.
        message: String,
    },
}

/// Port for the upstream rate source.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UpstreamSource: Send + Sync {
    /// Fetch the current payload. One attempt, no retry.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on timeout, non-success status, transport
    /// failure, or an unparseable body.
    async fn fetch_snapshot(&self) -> Result<UpstreamPayload, FetchError>;
}
