//! Quote Query Service
//!
//! Read-side use cases shared by the HTTP endpoints and the live channel.
//! Everything is served from the cache; nothing here calls upstream.

use std::sync::Arc;

use serde::Serialize;

use super::cache_store::CacheStore;
use super::poller::SyncStatus;
use crate::application::ports::CacheError;
use crate::domain::events::{HealthReport, HealthStatus};
use crate::domain::quote::{InstrumentQuote, normalize_code};
use crate::domain::subscription::{RegistryStats, SubscriptionRegistry};

/// Read-path errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueryError {
    /// No cached data answers the request.
    #[error("{0}")]
    NotFound(String),

    /// The cache backend failed the read.
    #[error("cache unavailable: {0}")]
    CacheUnavailable(#[from] CacheError),
}

/// The full cached snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllCurrencies {
    /// Every cached record.
    pub detail: Vec<InstrumentQuote>,
    /// Number of records.
    pub count: usize,
    /// Completion time of the cycle that produced the snapshot.
    pub last_sync: Option<String>,
}

/// Answer to a multi-code lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkLookup {
    /// Records found.
    pub detail: Vec<InstrumentQuote>,
    /// Codes in the request.
    pub requested: usize,
    /// Records found.
    pub found: usize,
    /// Requested codes with no record, as the client spelled them.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
}

/// Cache-backed read operations.
#[derive(Debug, Clone)]
pub struct QuoteQueryService {
    cache: CacheStore,
    registry: Arc<SubscriptionRegistry>,
    sync: Arc<SyncStatus>,
}

impl QuoteQueryService {
    /// Create the service.
    #[must_use]
    pub const fn new(
        cache: CacheStore,
        registry: Arc<SubscriptionRegistry>,
        sync: Arc<SyncStatus>,
    ) -> Self {
        Self {
            cache,
            registry,
            sync,
        }
    }

    /// The cache store behind this service.
    #[must_use]
    pub const fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// The full cached snapshot.
    ///
    /// # Errors
    ///
    /// `NotFound` when nothing is cached, `CacheUnavailable` on a read fault.
    pub async fn all_currencies(&self) -> Result<AllCurrencies, QueryError> {
        let Some(detail) = self.cache.all_quotes().await? else {
            return Err(QueryError::NotFound("Currency data not available".to_string()));
        };
        let last_sync = self.cache.last_sync().await?;

        Ok(AllCurrencies {
            count: detail.len(),
            detail,
            last_sync,
        })
    }

    /// Records for the given codes. An empty answer is not an error.
    ///
    /// # Errors
    ///
    /// `CacheUnavailable` on a read fault.
    pub async fn lookup(&self, codes: &[String]) -> Result<BulkLookup, QueryError> {
        let detail = self.cache.bulk_get(codes).await?;

        let missing = codes
            .iter()
            .filter(|code| {
                let code = normalize_code(code);
                !code.is_empty() && !detail.iter().any(|q| q.code == code)
            })
            .cloned()
            .collect();

        Ok(BulkLookup {
            requested: codes.len(),
            found: detail.len(),
            detail,
            missing,
        })
    }

    /// Records for the given codes, failing when none are cached.
    ///
    /// # Errors
    ///
    /// `NotFound` when no requested code is cached, `CacheUnavailable` on a
    /// read fault.
    pub async fn bulk_currencies(&self, codes: &[String]) -> Result<BulkLookup, QueryError> {
        let lookup = self.lookup(codes).await?;
        if lookup.detail.is_empty() {
            return Err(QueryError::NotFound("No currency data available".to_string()));
        }
        Ok(lookup)
    }

    /// Service health.
    ///
    /// An unreachable cache reports `unhealthy`; a reachable but empty cache
    /// reports `degraded`. Read faults are folded into the report.
    pub async fn health(&self) -> HealthReport {
        let cache_connected = self.cache.ping().await;
        let upstream_connected = self.sync.upstream_connected();

        let (currencies_count, last_sync) = if cache_connected {
            let count = match self.cache.all_quotes().await {
                Ok(quotes) => quotes.map_or(0, |q| q.len()),
                Err(e) => {
                    tracing::warn!(error = %e, "Health check could not read snapshot");
                    0
                }
            };
            (count, self.cache.last_sync().await.ok().flatten())
        } else {
            (0, None)
        };

        let status = match (cache_connected, currencies_count > 0) {
            (false, _) => HealthStatus::Unhealthy,
            (true, true) => HealthStatus::Healthy,
            (true, false) => HealthStatus::Degraded,
        };

        HealthReport {
            status,
            last_sync,
            currencies_count,
            cache_active: currencies_count > 0,
            cache_connected,
            upstream_connected,
        }
    }

    /// Live-channel registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::*;
    use crate::application::ports::{CacheBackend, MockCacheBackend};
    use crate::application::services::cache_store::CachePolicy;
    use crate::domain::quote::Snapshot;
    use crate::infrastructure::cache::MemoryCache;

    fn quote(code: &str) -> InstrumentQuote {
        InstrumentQuote {
            code: code.to_string(),
            usd_buy: Decimal::ONE,
            inr_buy: Decimal::ONE,
            usd_sell: Decimal::ONE,
            inr_sell: Decimal::ONE,
            observed_at: "2026-10-15 09:00:00".to_string(),
        }
    }

    fn service(backend: Arc<dyn CacheBackend>) -> QuoteQueryService {
        QuoteQueryService::new(
            CacheStore::new(backend, CachePolicy::default()),
            Arc::new(SubscriptionRegistry::new()),
            Arc::new(SyncStatus::new()),
        )
    }

    async fn seeded() -> QuoteQueryService {
        let svc = service(Arc::new(MemoryCache::new()));
        svc.cache()
            .write_snapshot(&Snapshot::new(vec![quote("USD"), quote("EUR")], Utc::now()))
            .await
            .unwrap();
        svc
    }

    fn codes(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn all_currencies_not_found_when_empty() {
        let svc = service(Arc::new(MemoryCache::new()));

        let result = svc.all_currencies().await;

        assert!(matches!(result, Err(QueryError::NotFound(_))));
    }

    #[tokio::test]
    async fn all_currencies_returns_snapshot_and_sync_time() {
        let svc = seeded().await;

        let all = svc.all_currencies().await.unwrap();

        assert_eq!(all.count, 2);
        assert!(all.last_sync.is_some());
    }

    #[tokio::test]
    async fn bulk_reports_missing_codes_as_requested() {
        let svc = seeded().await;

        let lookup = svc.bulk_currencies(&codes(&["usd", "XXX"])).await.unwrap();

        assert_eq!(lookup.requested, 2);
        assert_eq!(lookup.found, 1);
        assert_eq!(lookup.missing, vec!["XXX".to_string()]);
    }

    #[tokio::test]
    async fn bulk_omits_missing_when_all_found() {
        let svc = seeded().await;

        let lookup = svc.bulk_currencies(&codes(&["USD", "EUR"])).await.unwrap();
        let json = serde_json::to_value(&lookup).unwrap();

        assert_eq!(json["found"], 2);
        assert!(json.get("missing").is_none());
    }

    #[tokio::test]
    async fn bulk_not_found_when_nothing_cached() {
        let svc = seeded().await;

        let result = svc.bulk_currencies(&codes(&["XXX"])).await;

        assert!(matches!(result, Err(QueryError::NotFound(_))));
    }

    #[tokio::test]
    async fn lookup_surfaces_cache_fault() {
        let mut backend = MockCacheBackend::new();
        backend.expect_get().returning(|_| {
            Err(CacheError::Read {
                message: "timeout".to_string(),
            })
        });
        let svc = service(Arc::new(backend));

        let result = svc.lookup(&codes(&["USD"])).await;

        assert!(matches!(result, Err(QueryError::CacheUnavailable(_))));
    }

    #[tokio::test]
    async fn health_reflects_cache_state() {
        let empty = service(Arc::new(MemoryCache::new()));
        assert_eq!(empty.health().await.status, HealthStatus::Degraded);

        let svc = seeded().await;
        let report = svc.health().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.currencies_count, 2);
        assert!(report.cache_active);
        assert!(!report.upstream_connected);
    }

    #[tokio::test]
    async fn health_unhealthy_when_cache_unreachable() {
        let mut backend = MockCacheBackend::new();
        backend.expect_ping().returning(|| false);
        let svc = service(Arc::new(backend));

        let report = svc.health().await;

        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(!report.cache_connected);
    }
}
