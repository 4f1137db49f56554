//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for the cache, the upstream source, and event delivery.
pub mod ports;

/// Application services for ingestion, fan-out, and cache-backed reads.
pub mod services;
