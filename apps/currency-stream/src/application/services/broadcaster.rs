//! Fanout Broadcaster
//!
//! Pushes each new snapshot to live-channel connections: one global update
//! to everyone, then per-record updates to each code's topic group in small
//! batches with a short pause between batches.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::application::ports::EventSink;
use crate::domain::events::{CurrencySpecificUpdate, CurrencyUpdate, ErrorNotice, OutboundEvent};
use crate::domain::quote::Snapshot;
use crate::domain::subscription::SubscriptionRegistry;

/// Fan-out pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanoutConfig {
    /// Records per batch.
    pub batch_size: usize,
    /// Pause between batches.
    pub pause: Duration,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            pause: Duration::from_millis(1),
        }
    }
}

/// Delivery counts for one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections that received the global update.
    pub global_receivers: usize,
    /// Per-topic updates delivered.
    pub topic_deliveries: usize,
}

/// Snapshot fan-out to live-channel connections.
pub struct FanoutBroadcaster {
    sink: Arc<dyn EventSink>,
    registry: Arc<SubscriptionRegistry>,
    config: FanoutConfig,
}

impl std::fmt::Debug for FanoutBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutBroadcaster")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FanoutBroadcaster {
    /// Create a broadcaster over a sink and the registry used for topic lookup.
    #[must_use]
    pub fn new(
        sink: Arc<dyn EventSink>,
        registry: Arc<SubscriptionRegistry>,
        config: FanoutConfig,
    ) -> Self {
        Self {
            sink,
            registry,
            config,
        }
    }

    /// Broadcast a snapshot.
    ///
    /// The global update is always sent before any per-topic update.
    pub async fn broadcast_snapshot(&self, snapshot: &Snapshot) -> BroadcastReport {
        let global = OutboundEvent::CurrencyUpdate(CurrencyUpdate {
            kind: "live-update",
            data: snapshot.quotes().to_vec(),
            count: snapshot.len(),
            timestamp: Utc::now(),
        });
        let mut report = BroadcastReport {
            global_receivers: self.sink.emit_all(&global),
            ..BroadcastReport::default()
        };

        let batch_size = self.config.batch_size.max(1);
        let mut batches = snapshot.quotes().chunks(batch_size).peekable();

        while let Some(batch) = batches.next() {
            for quote in batch {
                let members = self.registry.topic_members(&quote.code);
                if members.is_empty() {
                    continue;
                }
                let event = OutboundEvent::CurrencySpecificUpdate(CurrencySpecificUpdate {
                    currency: quote.code.clone(),
                    data: quote.clone(),
                    timestamp: Utc::now(),
                });
                report.topic_deliveries += self.sink.emit_to(&members, &event);
            }

            if batches.peek().is_some() && !self.config.pause.is_zero() {
                tokio::time::sleep(self.config.pause).await;
            }
        }

        tracing::debug!(
            records = snapshot.len(),
            global_receivers = report.global_receivers,
            topic_deliveries = report.topic_deliveries,
            "Snapshot broadcast"
        );

        report
    }

    /// Send a fault notification to every connection.
    pub fn emit_fault(&self, message: &str) -> usize {
        let event = OutboundEvent::Error(ErrorNotice::fault("fetch-error", message));
        self.sink.emit_all(&event)
    }
}

// =============================================================================
// Tests
// =============================================================================
