//! Domain Layer - Core rate and subscription types.
//!
//! This layer contains the core domain types for reference-rate
//! distribution with no I/O. All types here are pure Rust with
//! serialization support.

/// Instrument quotes, snapshots, and upstream payload normalization.
pub mod quote;

/// Per-connection subscription tracking and topic groups.
pub mod subscription;

/// Live-channel inbound and outbound events.
pub mod events;
