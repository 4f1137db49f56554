//! Event Sink Port (Driven Port)
//!
//! Interface for delivering outbound events to live-channel connections.

use crate::domain::events::OutboundEvent;
use crate::domain::subscription::ConnectionId;

/// Port for pushing events to connected clients.
///
/// Delivery is best-effort: a connection that cannot accept a frame is
/// skipped. Each call serializes the event once.
pub trait EventSink: Send + Sync {
    /// Send to every connection. Returns the number of receivers.
    fn emit_all(&self, event: &OutboundEvent) -> usize;

    /// Send to the listed connections. Returns the number delivered.
    fn emit_to(&self, connections: &[ConnectionId], event: &OutboundEvent) -> usize;
}
