//! Application Ports (Driver and Driven)
//!
//! Ports define interfaces for interacting with external systems.
//! - **Driven Ports** (Secondary/Outbound): the shared cache, the upstream
//!   rate source, and the live-channel event sink.
//!
//! Infrastructure adapters implement these; services depend only on them.

mod cache_port;
mod event_sink_port;
mod upstream_port;

pub use cache_port::{CacheBackend, CacheError};
pub use event_sink_port::EventSink;
pub use upstream_port::{FetchError, UpstreamSource};

#[cfg(test)]
pub use cache_port::MockCacheBackend;
#[cfg(test)]
pub use upstream_port::MockUpstreamSource;
