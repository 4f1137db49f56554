//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Connection hub for live-channel frame delivery.
pub mod broadcast;

/// Cache backends (in-memory and Redis).
pub mod cache;

/// Configuration loading.
pub mod config;

/// HTTP read endpoints, probes, and the live-channel upgrade.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing integration.
pub mod telemetry;

/// Upstream rate source client.
pub mod upstream;

/// Live-channel WebSocket sessions.
pub mod websocket;
