//! Connection Hub
//!
//! Delivers serialized outbound frames to live-channel connections.
//!
//! # Architecture
//!
//! The `ConnectionHub` keeps two paths per connection:
//! - a shared tokio broadcast channel for frames addressed to everyone
//!   (global updates, fault notices), serialized once per send
//! - a bounded per-connection queue for topic updates
//!
//! Every frame is stamped with a broadcast sequence: a global frame carries
//! the number of the global send it is, a topic frame carries the number of
//! the last global send before it. Sessions use the stamp to write frames in
//! the order they were emitted, so a global update always reaches a
//! connection before the topic updates that follow it, and topic updates of
//! an earlier broadcast are never overtaken by a later global update.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::Utf8Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};

use crate::application::ports::EventSink;
use crate::domain::events::OutboundEvent;
use crate::domain::subscription::ConnectionId;
use crate::infrastructure::config::LiveChannelSettings;
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// Channel capacities for the hub.
#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    /// Capacity of the global frame channel.
    pub global_capacity: usize,
    /// Capacity of each connection's direct queue.
    pub connection_queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            global_capacity: 64,
            connection_queue_capacity: 256,
        }
    }
}

impl From<&LiveChannelSettings> for HubConfig {
    fn from(settings: &LiveChannelSettings) -> Self {
        Self {
            global_capacity: settings.global_channel_capacity,
            connection_queue_capacity: settings.connection_queue_capacity,
        }
    }
}

// =============================================================================
// Frames
// =============================================================================

/// An encoded text frame stamped with its broadcast sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// For a global frame, its own sequence. For a direct frame, the
    /// sequence of the last global frame emitted before it.
    pub seq: u64,
    /// Serialized event.
    pub text: Utf8Bytes,
}

impl Frame {
    /// Whether this direct frame was emitted before the global frame `global`.
    #[must_use]
    pub const fn precedes(&self, global: &Self) -> bool {
        self.seq < global.seq
    }
}

// =============================================================================
// Connection Handle
// =============================================================================

/// Receiving side of a registered connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Hub-assigned id.
    pub id: ConnectionId,
    /// Frames addressed to every connection.
    pub global_rx: broadcast::Receiver<Frame>,
    /// Frames addressed to this connection only.
    pub direct_rx: mpsc::Receiver<Frame>,
}

// =============================================================================
// Connection Hub
// =============================================================================

/// Registry of open connections and their outbound queues.
///
/// # Example
///
/// ```rust
/// use currency_stream::application::ports::EventSink;
/// use currency_stream::domain::events::OutboundEvent;
/// use currency_stream::infrastructure::broadcast::{ConnectionHub, HubConfig};
///
/// let hub = ConnectionHub::new(HubConfig::default());
/// let mut handle = hub.register();
///
/// assert_eq!(hub.emit_to(&[handle.id], &OutboundEvent::error("oops")), 1);
/// assert!(handle.direct_rx.try_recv().is_ok());
/// ```
#[derive(Debug)]
pub struct ConnectionHub {
    global_tx: broadcast::Sender<Frame>,
    /// Sequence of the last global frame. Held across the global send.
    global_seq: Mutex<u64>,
    connections: RwLock<HashMap<ConnectionId, mpsc::Sender<Frame>>>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl ConnectionHub {
    /// Create a hub with the given capacities.
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        Self {
            global_tx: broadcast::channel(config.global_capacity.max(1)).0,
            global_seq: Mutex::new(0),
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_capacity: config.connection_queue_capacity.max(1),
        }
    }

    /// Create a hub with default capacities.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(HubConfig::default())
    }

    /// Register a new connection and hand back its receivers.
    pub fn register(&self) -> ConnectionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, direct_rx) = mpsc::channel(self.queue_capacity);
        let global_rx = self.global_tx.subscribe();

        let count = {
            let mut connections = self.connections.write();
            connections.insert(id, tx);
            connections.len()
        };
        metrics::set_connections(count);

        ConnectionHandle {
            id,
            global_rx,
            direct_rx,
        }
    }

    /// Drop a connection's direct queue. Returns whether it was registered.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let (removed, count) = {
            let mut connections = self.connections.write();
            let removed = connections.remove(&id).is_some();
            (removed, connections.len())
        };
        metrics::set_connections(count);
        removed
    }

    /// Number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Number of live global receivers.
    #[must_use]
    pub fn global_receiver_count(&self) -> usize {
        self.global_tx.receiver_count()
    }

    /// Serialize an event into a text frame.
    #[must_use]
    pub fn encode(event: &OutboundEvent) -> Option<Utf8Bytes> {
        match serde_json::to_string(event) {
            Ok(text) => Some(Utf8Bytes::from(text)),
            Err(e) => {
                tracing::error!(event = event.name(), error = %e, "Failed to encode outbound event");
                None
            }
        }
    }
}

impl EventSink for ConnectionHub {
    fn emit_all(&self, event: &OutboundEvent) -> usize {
        let Some(text) = Self::encode(event) else {
            return 0;
        };
        let receivers = {
            let mut seq = self.global_seq.lock();
            *seq += 1;
            // Err means no receivers, which is not a failure.
            self.global_tx
                .send(Frame { seq: *seq, text })
                .unwrap_or(0)
        };
        metrics::record_messages_sent(event.name(), receivers as u64);
        receivers
    }

    fn emit_to(&self, connections: &[ConnectionId], event: &OutboundEvent) -> usize {
        if connections.is_empty() {
            return 0;
        }
        let Some(text) = Self::encode(event) else {
            return 0;
        };
        let frame = Frame {
            seq: *self.global_seq.lock(),
            text,
        };

        let mut delivered = 0usize;
        let mut dropped = 0u64;
        {
            let registered = self.connections.read();
            for id in connections {
                match registered.get(id).map(|tx| tx.try_send(frame.clone())) {
                    Some(Ok(())) => delivered += 1,
                    Some(Err(mpsc::error::TrySendError::Full(_))) => {
                        tracing::debug!(connection = id, "Connection queue full, dropping frame");
                        dropped += 1;
                    }
                    Some(Err(mpsc::error::TrySendError::Closed(_))) | None => dropped += 1,
                }
            }
        }

        metrics::record_messages_sent(event.name(), delivered as u64);
        if dropped > 0 {
            metrics::record_messages_dropped(dropped);
        }
        delivered
    }
}

/// Shared connection hub reference.
pub type SharedConnectionHub = Arc<ConnectionHub>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_creation() {
        let hub = ConnectionHub::with_defaults();
        assert_eq!(hub.connection_count(), 0);
        assert_eq!(hub.global_receiver_count(), 0);
    }

    #[test]
    fn register_assigns_unique_ids() {
        let hub = ConnectionHub::with_defaults();

        let a = hub.register();
        let b = hub.register();

        assert_ne!(a.id, b.id);
        assert_eq!(hub.connection_count(), 2);
        assert_eq!(hub.global_receiver_count(), 2);
    }

    #[test]
    fn unregister_is_idempotent() {
        let hub = ConnectionHub::with_defaults();
        let handle = hub.register();

        assert!(hub.unregister(handle.id));
        assert!(!hub.unregister(handle.id));
        assert_eq!(hub.connection_count(), 0);
    }

    #[test]
    fn global_receiver_count_decreases_on_drop() {
        let hub = ConnectionHub::with_defaults();

        {
            let _handle = hub.register();
            assert_eq!(hub.global_receiver_count(), 1);
        }

        assert_eq!(hub.global_receiver_count(), 0);
    }

    #[tokio::test]
    async fn emit_all_reaches_every_connection() {
        let hub = ConnectionHub::with_defaults();
        let mut a = hub.register();
        let mut b = hub.register();

        let receivers = hub.emit_all(&OutboundEvent::error("x"));

        assert_eq!(receivers, 2);
        let fa = a.global_rx.recv().await.unwrap();
        let fb = b.global_rx.recv().await.unwrap();
        assert_eq!(fa, fb);
        assert!(fa.text.as_str().contains("\"event\":\"error\""));
    }

    #[test]
    fn emit_all_without_connections_is_zero() {
        let hub = ConnectionHub::with_defaults();
        assert_eq!(hub.emit_all(&OutboundEvent::error("x")), 0);
    }

    #[test]
    fn emit_to_skips_unknown_connections() {
        let hub = ConnectionHub::with_defaults();
        let mut handle = hub.register();

        let delivered = hub.emit_to(&[handle.id, 999], &OutboundEvent::error("x"));

        assert_eq!(delivered, 1);
        assert!(handle.direct_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn frames_are_stamped_with_global_sequence() {
        let hub = ConnectionHub::with_defaults();
        let mut handle = hub.register();

        hub.emit_to(&[handle.id], &OutboundEvent::error("before any global"));
        hub.emit_all(&OutboundEvent::error("first global"));
        hub.emit_to(&[handle.id], &OutboundEvent::error("after first"));
        hub.emit_all(&OutboundEvent::error("second global"));

        let early = handle.direct_rx.recv().await.unwrap();
        let late = handle.direct_rx.recv().await.unwrap();
        let first = handle.global_rx.recv().await.unwrap();
        let second = handle.global_rx.recv().await.unwrap();

        assert_eq!((early.seq, late.seq), (0, 1));
        assert_eq!((first.seq, second.seq), (1, 2));
        assert!(early.precedes(&first));
        assert!(!late.precedes(&first));
        assert!(late.precedes(&second));
    }

    #[test]
    fn full_queue_drops_frames() {
        let hub = ConnectionHub::new(HubConfig {
            global_capacity: 4,
            connection_queue_capacity: 1,
        });
        let handle = hub.register();

        assert_eq!(hub.emit_to(&[handle.id], &OutboundEvent::error("first")), 1);
        assert_eq!(hub.emit_to(&[handle.id], &OutboundEvent::error("second")), 0);
    }
}
