#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::panic
    )
)]

//! Currency Stream - Reference Rate Fan-out
//!
//! Polls one upstream rate source on a fixed interval, writes each snapshot
//! to a shared cache, and pushes updates to live-channel clients. Every read
//! endpoint is served from the cache; upstream is only ever called by the
//! poller.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `quote`: Instrument records, snapshots, upstream payload normalization
//!   - `subscription`: Per-connection subscription sets and topic groups
//!   - `events`: Tagged inbound and outbound live-channel events
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Cache backend, upstream source, event sink
//!   - `services`: Cache store, ingestion poller, fan-out, queries
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `cache`: In-memory and Redis backends
//!   - `upstream`: HTTP client for the rate source
//!   - `broadcast`: Connection hub (global channel + per-connection queues)
//!   - `websocket`: Live-channel sessions
//!   - `http`: Read endpoints, probes, metrics
//!   - `config`: Environment configuration
//!
//! # Data Flow
//!
//! ```text
//!                ┌──────────┐     ┌─────────┐
//! Upstream ─────►│  Poller  │────►│  Cache  │◄──── HTTP reads
//!                └────┬─────┘     └─────────┘      live-channel requests
//!                     │
//!                     ▼
//!               ┌───────────┐     ┌─────────┐
//!               │  Fan-out  │────►│   Hub   │───► Connection 1..N
//!               └───────────┘     └─────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::events::{HealthReport, HealthStatus, InboundEvent, OutboundEvent};
pub use domain::quote::{InstrumentQuote, Snapshot, UpstreamPayload};
pub use domain::subscription::{
    ConnectionId, RegistryStats, SubscriptionError, SubscriptionRegistry,
};

// Ports and services
pub use application::ports::{CacheBackend, CacheError, EventSink, FetchError, UpstreamSource};
pub use application::services::{
    CachePolicy, CacheStore, CycleOutcome, FanoutBroadcaster, FanoutConfig, IngestionPoller,
    QueryError, QuoteQueryService, SyncStatus,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, ServiceConfig};

// Adapters (for integration tests)
pub use infrastructure::broadcast::{ConnectionHub, HubConfig, SharedConnectionHub};
pub use infrastructure::cache::{MemoryCache, RedisCache};
pub use infrastructure::http::{AppState, HttpServer, HttpServerError, router};
pub use infrastructure::upstream::HttpUpstreamClient;
pub use infrastructure::websocket::LiveChannel;

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
