//! Cache Store Service
//!
//! Key layout and read/write policy on top of a [`CacheBackend`]:
//!
//! | Key | Value | TTL |
//! |---|---|---|
//! | `all` | full snapshot (JSON array) | snapshot TTL |
//! | `last_sync` | ISO timestamp (JSON string) | snapshot TTL |
//! | `by-code:<CODE>` | one record | snapshot TTL |
//! | `bulk:<A,B,...>` | memoized multi-code answer | bulk memo TTL |
//!
//! Bulk keys are built from the sorted, de-duplicated, upper-cased code list
//! so the same set of codes in any order shares one memo entry.

use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::application::ports::{CacheBackend, CacheError};
use crate::domain::quote::{InstrumentQuote, Snapshot, normalize_code};
use crate::infrastructure::metrics;

// =============================================================================
// Key Layout
// =============================================================================

/// Key holding the full snapshot.
pub const ALL_KEY: &str = "all";

/// Key holding the last successful sync time.
pub const LAST_SYNC_KEY: &str = "last_sync";

/// Code lists precomputed into bulk memo entries on every cycle.
pub const POPULAR_BUNDLES: [&[&str]; 4] = [
    &["USD", "EUR", "GBP", "JPY", "AUD"],
    &["BTC", "ETH", "USD", "EUR"],
    &["USD", "JPY", "CNY", "KRW", "INR"],
    &["EUR", "GBP", "CHF", "NOK", "SEK"],
];

/// Key for a single instrument's record.
#[must_use]
pub fn code_key(code: &str) -> String {
    format!("by-code:{}", normalize_code(code))
}

/// Normalize, drop blanks, and de-duplicate codes, keeping first-seen order.
#[must_use]
pub fn unique_codes<S: AsRef<str>>(codes: &[S]) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(codes.len());
    for code in codes {
        let code = normalize_code(code.as_ref());
        if !code.is_empty() && !unique.contains(&code) {
            unique.push(code);
        }
    }
    unique
}

/// Memo key for a multi-code query. Independent of input order and casing.
#[must_use]
pub fn bulk_key<S: AsRef<str>>(codes: &[S]) -> String {
    let mut unique = unique_codes(codes);
    unique.sort_unstable();
    format!("bulk:{}", unique.join(","))
}

// =============================================================================
// Policy
// =============================================================================

/// TTLs and batch sizes applied by the cache store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// TTL for `all`, `last_sync`, `by-code:*` and bundles.
    pub snapshot_ttl: Duration,
    /// TTL for memoized `bulk:*` entries.
    pub bulk_memo_ttl: Duration,
    /// Maximum keys per multi-key fetch.
    pub chunk_size: usize,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            snapshot_ttl: Duration::from_secs(300),
            bulk_memo_ttl: Duration::from_secs(120),
            chunk_size: 100,
        }
    }
}

// =============================================================================
// Cache Store
// =============================================================================

/// Typed access to the shared cache.
#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    policy: CachePolicy,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("backend", &self.backend.name())
            .field("policy", &self.policy)
            .finish()
    }
}

impl CacheStore {
    /// Create a cache store over a backend.
    #[must_use]
    pub fn new(backend: Arc<dyn CacheBackend>, policy: CachePolicy) -> Self {
        Self { backend, policy }
    }

    /// The policy in effect.
    #[must_use]
    pub const fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Whether the backend answers.
    pub async fn ping(&self) -> bool {
        self.backend.ping().await
    }

    /// Read and decode one key.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Read`] on backend failure and
    /// [`CacheError::Codec`] if the stored value does not decode.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let Some(raw) = self.backend.get(key).await? else {
            return Ok(None);
        };
        decode(key, &raw).map(Some)
    }

    /// Encode and write one key.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Write`] on backend failure.
    pub async fn set_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let raw = encode(key, value)?;
        self.backend.set_ex(key, &raw, ttl).await
    }

    /// The cached full snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the read fails.
    pub async fn all_quotes(&self) -> Result<Option<Vec<InstrumentQuote>>, CacheError> {
        self.get_json(ALL_KEY).await
    }

    /// The cached last sync time.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the read fails.
    pub async fn last_sync(&self) -> Result<Option<String>, CacheError> {
        self.get_json(LAST_SYNC_KEY).await
    }

    /// Records for the given codes, via the bulk memo.
    ///
    /// A memo hit is returned as stored. On a miss the per-code keys are
    /// fetched in chunks, absent codes are dropped, and a non-empty result is
    /// memoized. A memo write failure is logged and does not fail the read.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if any backend read fails.
    pub async fn bulk_get<S: AsRef<str>>(
        &self,
        codes: &[S],
    ) -> Result<Vec<InstrumentQuote>, CacheError> {
        let unique = unique_codes(codes);
        if unique.is_empty() {
            return Ok(Vec::new());
        }

        let memo_key = bulk_key(&unique[..]);
        if let Some(hit) = self.get_json::<Vec<InstrumentQuote>>(&memo_key).await? {
            metrics::record_bulk_lookup(true);
            return Ok(hit);
        }
        metrics::record_bulk_lookup(false);

        let keys: Vec<String> = unique.iter().map(|c| code_key(c)).collect();
        let chunk_size = self.policy.chunk_size.max(1);
        let chunks =
            try_join_all(keys.chunks(chunk_size).map(|chunk| self.backend.mget(chunk))).await?;

        let mut found = Vec::with_capacity(keys.len());
        for (key, raw) in keys.iter().zip(chunks.into_iter().flatten()) {
            let Some(raw) = raw else { continue };
            match decode::<InstrumentQuote>(key, &raw) {
                Ok(quote) => found.push(quote),
                Err(e) => tracing::warn!(error = %e, "Skipping undecodable cache entry"),
            }
        }

        if !found.is_empty() {
            if let Err(e) = self
                .set_json(&memo_key, &found, self.policy.bulk_memo_ttl)
                .await
            {
                tracing::warn!(key = %memo_key, error = %e, "Failed to memoize bulk lookup");
            }
        }

        Ok(found)
    }

    /// Write many entries as one atomic batch.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Write`] if the batch fails.
    pub async fn pipelined_set(
        &self,
        entries: &[(String, String)],
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.backend.set_many_ex(entries, ttl).await
    }

    /// Write every key derived from a snapshot in one batch.
    ///
    /// Returns the number of entries written.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if encoding or the batch write fails; in that
    /// case no entry from this snapshot is applied.
    pub async fn write_snapshot(&self, snapshot: &Snapshot) -> Result<usize, CacheError> {
        let entries = snapshot_entries(snapshot)?;
        self.pipelined_set(&entries, self.policy.snapshot_ttl).await?;
        Ok(entries.len())
    }
}

/// Build the full key/value batch for a snapshot.
///
/// # Errors
///
/// Returns [`CacheError::Codec`] if a value cannot be encoded.
pub fn snapshot_entries(snapshot: &Snapshot) -> Result<Vec<(String, String)>, CacheError> {
    let mut entries = Vec::with_capacity(snapshot.len() + 2 + POPULAR_BUNDLES.len());

    entries.push((ALL_KEY.to_string(), encode(ALL_KEY, snapshot.quotes())?));
    entries.push((
        LAST_SYNC_KEY.to_string(),
        encode(LAST_SYNC_KEY, &snapshot.synced_at())?,
    ));

    for quote in snapshot.quotes() {
        let key = code_key(&quote.code);
        let value = encode(&key, quote)?;
        entries.push((key, value));
    }

    for bundle in POPULAR_BUNDLES {
        let view = snapshot.filtered(bundle);
        if view.is_empty() {
            continue;
        }
        let key = bulk_key(bundle);
        let value = encode(&key, &view)?;
        entries.push((key, value));
    }

    Ok(entries)
}

fn encode<T: Serialize + ?Sized>(key: &str, value: &T) -> Result<String, CacheError> {
    serde_json::to_string(value).map_err(|e| CacheError::Codec {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T, CacheError> {
    serde_json::from_str(raw).map_err(|e| CacheError::Codec {
        key: key.to_string(),
        message: e.to_string(),
    })
}

// =============================================================================
// Tests
// =============================================================================
