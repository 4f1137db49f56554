//! Live Channel Events
//!
//! Closed sets of inbound and outbound events exchanged over a live-channel
//! connection. Each frame is a JSON object `{"event": <name>, "data": {...}}`
//! where `data` has a fixed schema per event name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::quote::{InstrumentCode, InstrumentQuote};
use crate::domain::subscription::RegistryStats;

// =============================================================================
// Inbound
// =============================================================================

/// List of instrument codes carried by inbound requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CurrencyList {
    /// Requested codes, in client order and casing.
    #[serde(default)]
    pub currencies: Vec<String>,
}

/// Events a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum InboundEvent {
    /// Subscribe to pushed updates for the listed codes.
    SubscribeCurrencies(CurrencyList),
    /// Stop pushed updates for the listed codes.
    UnsubscribeCurrencies(CurrencyList),
    /// One-off lookup of the listed codes.
    GetCurrenciesBulk(CurrencyList),
    /// One-off request for the full snapshot.
    GetAllCurrencies,
    /// One-off request for service health.
    GetHealthStatus,
}

// =============================================================================
// Outbound
// =============================================================================

/// Reply to `subscribe-currencies`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionConfirmed {
    /// Codes as requested by the client.
    pub currencies: Vec<String>,
    /// Number of records in `data`.
    pub count: usize,
    /// Current cached records for the requested codes.
    pub data: Vec<InstrumentQuote>,
    /// Handling time in milliseconds.
    pub response_time: u64,
    /// Reply time.
    pub timestamp: DateTime<Utc>,
}

/// Reply to `unsubscribe-currencies`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscriptionConfirmed {
    /// Codes removed by this call.
    pub currencies: Vec<InstrumentCode>,
    /// Codes still subscribed.
    pub remaining: usize,
    /// Reply time.
    pub timestamp: DateTime<Utc>,
}

/// Reply to `get-currencies-bulk`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrenciesBulkResponse {
    /// Codes as requested by the client.
    pub currencies: Vec<String>,
    /// Number of records in `data`.
    pub count: usize,
    /// Cached records found.
    pub data: Vec<InstrumentQuote>,
    /// Handling time in milliseconds.
    pub response_time: u64,
    /// Always true: served from cache.
    pub cached: bool,
    /// Reply time.
    pub timestamp: DateTime<Utc>,
}

/// Reply to `get-all-currencies`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllCurrenciesResponse {
    /// Full cached snapshot.
    pub detail: Vec<InstrumentQuote>,
    /// Number of records.
    pub count: usize,
    /// Completion time of the cycle that produced the snapshot.
    pub last_sync: Option<String>,
    /// Handling time in milliseconds.
    pub response_time: u64,
    /// Always true: served from cache.
    pub cached: bool,
    /// Reply time.
    pub timestamp: DateTime<Utc>,
}

/// Reply to `get-health-status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatusResponse {
    /// Service health.
    #[serde(flatten)]
    pub health: HealthReport,
    /// Live-channel registry statistics.
    pub websocket: RegistryStats,
    /// Handling time in milliseconds.
    pub response_time: u64,
    /// Reply time.
    pub timestamp: DateTime<Utc>,
}

/// Global update carrying the full snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrencyUpdate {
    /// Always `live-update`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Full snapshot.
    pub data: Vec<InstrumentQuote>,
    /// Number of records.
    pub count: usize,
    /// Send time.
    pub timestamp: DateTime<Utc>,
}

/// Topic update carrying one record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrencySpecificUpdate {
    /// Code of the record.
    pub currency: InstrumentCode,
    /// The record.
    pub data: InstrumentQuote,
    /// Send time.
    pub timestamp: DateTime<Utc>,
}

/// Error notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorNotice {
    /// Error category, present on service-originated faults.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Human-readable message.
    pub message: String,
    /// Notice time, present on service-originated faults.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ErrorNotice {
    /// A reply-level error for a single client request.
    #[must_use]
    pub fn request(message: impl Into<String>) -> Self {
        Self {
            kind: None,
            message: message.into(),
            timestamp: None,
        }
    }

    /// A service-level fault sent to every connection.
    #[must_use]
    pub fn fault(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            message: message.into(),
            timestamp: Some(Utc::now()),
        }
    }
}

/// Events the service sends.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum OutboundEvent {
    /// Reply to `subscribe-currencies`.
    SubscriptionConfirmed(SubscriptionConfirmed),
    /// Reply to `unsubscribe-currencies`.
    UnsubscriptionConfirmed(UnsubscriptionConfirmed),
    /// Reply to `get-currencies-bulk`.
    CurrenciesBulkResponse(CurrenciesBulkResponse),
    /// Reply to `get-all-currencies`.
    AllCurrenciesResponse(AllCurrenciesResponse),
    /// Reply to `get-health-status`.
    HealthStatusResponse(HealthStatusResponse),
    /// Global snapshot update.
    CurrencyUpdate(CurrencyUpdate),
    /// Per-topic record update.
    CurrencySpecificUpdate(CurrencySpecificUpdate),
    /// Error notification.
    Error(ErrorNotice),
}

impl OutboundEvent {
    /// Wire name of the event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SubscriptionConfirmed(_) => "subscription-confirmed",
            Self::UnsubscriptionConfirmed(_) => "unsubscription-confirmed",
            Self::CurrenciesBulkResponse(_) => "currencies-bulk-response",
            Self::AllCurrenciesResponse(_) => "all-currencies-response",
            Self::HealthStatusResponse(_) => "health-status-response",
            Self::CurrencyUpdate(_) => "currency-update",
            Self::CurrencySpecificUpdate(_) => "currency-specific-update",
            Self::Error(_) => "error",
        }
    }

    /// Shorthand for a request-level error reply.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorNotice::request(message))
    }
}

// =============================================================================
// Health
// =============================================================================

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Cache reachable and holding a snapshot.
    Healthy,
    /// Cache reachable but empty.
    Degraded,
    /// Cache unreachable.
    Unhealthy,
}

/// Service health as reported by `GET /health` and `get-health-status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Overall status.
    pub status: HealthStatus,
    /// Completion time of the last cached cycle.
    pub last_sync: Option<String>,
    /// Records in the cached snapshot.
    pub currencies_count: usize,
    /// Whether a snapshot is cached.
    pub cache_active: bool,
    /// Whether the cache backend answered a ping.
    pub cache_connected: bool,
    /// Whether the most recent upstream fetch succeeded.
    pub upstream_connected: bool,
}

// =============================================================================
// Tests
// =============================================================================
