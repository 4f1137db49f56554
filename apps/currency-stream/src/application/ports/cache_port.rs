//! Cache Backend Port (Driven Port)
//!
//! Key/value store with per-entry expiry shared by every service replica.

use std::time::Duration;

use async_trait::async_trait;

/// Cache errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// The backend could not serve a read.
    #[error("cache read failed: {message}")]
    Read {
        /// Backend error text.
        message: String,
    },

    /// The backend rejected or failed a write.
    #[error("cache write failed: {message}")]
    Write {
        /// Backend error text.
        message: String,
    },

    /// A cached value could not be encoded or decoded.
    #[error("cache value codec error for '{key}': {message}")]
    Codec {
        /// Key whose value failed.
        key: String,
        /// Codec error text.
        message: String,
    },
}

/// Port for the shared key/value cache.
///
/// Values are JSON text. Every write carries a TTL; expired keys read as
/// absent.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Read one key.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Read`] if the backend is unreachable.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Read many keys in one round-trip, preserving input order.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Read`] if the backend is unreachable.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError>;

    /// Write one key with expiry.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Write`] if the write fails.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Write many keys with the same expiry as a single atomic batch.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Write`] if the batch fails; no entry is applied.
    async fn set_many_ex(
        &self,
        entries: &[(String, String)],
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Whether the backend answers.
    async fn ping(&self) -> bool;

    /// Backend name for logs.
    fn name(&self) -> &'static str;
}
