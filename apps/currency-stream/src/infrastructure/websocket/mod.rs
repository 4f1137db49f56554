//! Live Channel Sessions
//!
//! One session per upgraded WebSocket connection. A session registers with
//! the hub and the subscription registry on open, then loops over three
//! sources until the socket closes:
//!
//! - the hub's global frame channel (drained first)
//! - the connection's direct queue of topic updates
//! - inbound client frames, answered in place
//!
//! Before a global frame is written, queued topic updates stamped with an
//! earlier broadcast sequence are flushed, so updates reach the client in
//! emission order even when the connection is backlogged.
//!
//! Closing the socket removes the connection from every topic group.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;

use crate::application::services::{QueryError, QuoteQueryService};
use crate::domain::events::{
    AllCurrenciesResponse, CurrenciesBulkResponse, HealthStatusResponse, InboundEvent,
    OutboundEvent, SubscriptionConfirmed, UnsubscriptionConfirmed,
};
use crate::domain::subscription::{ConnectionId, SubscriptionError, SubscriptionRegistry};
use crate::infrastructure::broadcast::{
    ConnectionHandle, ConnectionHub, Frame, SharedConnectionHub,
};
use crate::infrastructure::metrics;

/// Reply to a frame that is not a known inbound event.
pub const INVALID_FRAME_MESSAGE: &str = "Invalid message format";

// =============================================================================
// Live Channel
// =============================================================================

/// Serves live-channel connections.
#[derive(Debug, Clone)]
pub struct LiveChannel {
    hub: SharedConnectionHub,
    registry: Arc<SubscriptionRegistry>,
    query: QuoteQueryService,
}

impl LiveChannel {
    /// Create a live channel over the shared hub, registry and read service.
    #[must_use]
    pub const fn new(
        hub: SharedConnectionHub,
        registry: Arc<SubscriptionRegistry>,
        query: QuoteQueryService,
    ) -> Self {
        Self {
            hub,
            registry,
            query,
        }
    }

    /// Open a session for an accepted connection and serve it until it closes.
    pub async fn serve(self, socket: WebSocket) {
        let handle = self.open();
        let id = handle.id;

        self.session(socket, handle).await;

        self.close(id);
    }

    /// Register a new connection with the hub and the registry.
    pub fn open(&self) -> ConnectionHandle {
        let handle = self.hub.register();
        self.registry.on_connect(handle.id);
        tracing::info!(connection = handle.id, "Live connection opened");
        handle
    }

    /// Remove a connection from the hub and every topic group.
    pub fn close(&self, id: ConnectionId) {
        self.hub.unregister(id);
        let dropped = self.registry.on_disconnect(id);
        metrics::set_subscriptions(self.registry.stats().total_subscriptions);
        tracing::info!(
            connection = id,
            subscriptions = dropped.len(),
            "Live connection closed"
        );
    }

    async fn session(&self, socket: WebSocket, handle: ConnectionHandle) {
        let ConnectionHandle {
            id,
            mut global_rx,
            mut direct_rx,
        } = handle;
        let (mut sink, mut stream) = socket.split();
        // Direct frame read ahead of a global frame it must follow.
        let mut held: Option<Frame> = None;

        loop {
            let outgoing = tokio::select! {
                biased;

                global = global_rx.recv() => match global {
                    Ok(global) => ordered_before(global, &mut held, &mut direct_rx),
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!(connection = id, lagged = n, "Global receiver lagged");
                        metrics::record_messages_dropped(n);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },

                direct = next_direct(&mut held, &mut direct_rx) => match direct {
                    Some(frame) => vec![frame.text],
                    None => break,
                },

                inbound = stream.next() => match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let reply = self.handle_frame(id, text.as_str()).await;
                        let Some(frame) = ConnectionHub::encode(&reply) else {
                            continue;
                        };
                        metrics::record_messages_sent(reply.name(), 1);
                        vec![frame]
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::debug!(connection = id, error = %e, "Live connection read failed");
                        break;
                    }
                },
            };

            for frame in outgoing {
                if sink.send(Message::Text(frame)).await.is_err() {
                    return;
                }
            }
        }
    }

    /// Parse and answer one inbound text frame.
    pub async fn handle_frame(&self, id: ConnectionId, text: &str) -> OutboundEvent {
        match serde_json::from_str::<InboundEvent>(text) {
            Ok(event) => self.dispatch(id, event).await,
            Err(e) => {
                tracing::debug!(connection = id, error = %e, "Rejected inbound frame");
                OutboundEvent::error(INVALID_FRAME_MESSAGE)
            }
        }
    }

    /// Answer one inbound event.
    pub async fn dispatch(&self, id: ConnectionId, event: InboundEvent) -> OutboundEvent {
        let started = Instant::now();
        match event {
            InboundEvent::SubscribeCurrencies(list) => {
                self.subscribe(id, list.currencies, started).await
            }
            InboundEvent::UnsubscribeCurrencies(list) => self.unsubscribe(id, &list.currencies),
            InboundEvent::GetCurrenciesBulk(list) => self.bulk(list.currencies, started).await,
            InboundEvent::GetAllCurrencies => self.all(started).await,
            InboundEvent::GetHealthStatus => self.health(started).await,
        }
    }

    async fn subscribe(
        &self,
        id: ConnectionId,
        currencies: Vec<String>,
        started: Instant,
    ) -> OutboundEvent {
        let max = self.registry.max_codes_per_request();
        if currencies.len() > max {
            let rejected = SubscriptionError::TooManyCodes {
                requested: currencies.len(),
                max,
            };
            tracing::info!(connection = id, requested = currencies.len(), "Subscription rejected");
            return OutboundEvent::error(rejected.to_string());
        }

        let lookup = match self.query.lookup(&currencies).await {
            Ok(lookup) => lookup,
            Err(e) => {
                tracing::error!(connection = id, error = %e, "Subscription lookup failed");
                return OutboundEvent::error("Failed to subscribe to currencies");
            }
        };

        let change = match self.registry.subscribe(id, &currencies) {
            Ok(change) => change,
            Err(e) => return OutboundEvent::error(e.to_string()),
        };
        metrics::set_subscriptions(self.registry.stats().total_subscriptions);

        let response_time = elapsed_ms(started);
        tracing::info!(
            connection = id,
            added = change.changed.len(),
            total = change.total,
            response_time_ms = response_time,
            "Connection subscribed"
        );

        OutboundEvent::SubscriptionConfirmed(SubscriptionConfirmed {
            currencies,
            count: lookup.found,
            data: lookup.detail,
            response_time,
            timestamp: Utc::now(),
        })
    }

    fn unsubscribe(&self, id: ConnectionId, currencies: &[String]) -> OutboundEvent {
        match self.registry.unsubscribe(id, currencies) {
            Ok(change) => {
                metrics::set_subscriptions(self.registry.stats().total_subscriptions);
                tracing::info!(
                    connection = id,
                    removed = change.changed.len(),
                    remaining = change.total,
                    "Connection unsubscribed"
                );
                OutboundEvent::UnsubscriptionConfirmed(UnsubscriptionConfirmed {
                    currencies: change.changed,
                    remaining: change.total,
                    timestamp: Utc::now(),
                })
            }
            Err(e) => OutboundEvent::error(e.to_string()),
        }
    }

    async fn bulk(&self, currencies: Vec<String>, started: Instant) -> OutboundEvent {
        match self.query.lookup(&currencies).await {
            Ok(lookup) => OutboundEvent::CurrenciesBulkResponse(CurrenciesBulkResponse {
                currencies,
                count: lookup.found,
                data: lookup.detail,
                response_time: elapsed_ms(started),
                cached: true,
                timestamp: Utc::now(),
            }),
            Err(e) => {
                tracing::error!(error = %e, "Bulk lookup failed");
                OutboundEvent::error("Failed to fetch bulk currencies")
            }
        }
    }

    async fn all(&self, started: Instant) -> OutboundEvent {
        match self.query.all_currencies().await {
            Ok(all) => OutboundEvent::AllCurrenciesResponse(AllCurrenciesResponse {
                detail: all.detail,
                count: all.count,
                last_sync: all.last_sync,
                response_time: elapsed_ms(started),
                cached: true,
                timestamp: Utc::now(),
            }),
            Err(QueryError::NotFound(message)) => OutboundEvent::error(message),
            Err(e) => {
                tracing::error!(error = %e, "Snapshot read failed");
                OutboundEvent::error("Failed to fetch all currencies")
            }
        }
    }

    async fn health(&self, started: Instant) -> OutboundEvent {
        let health = self.query.health().await;
        OutboundEvent::HealthStatusResponse(HealthStatusResponse {
            health,
            websocket: self.registry.stats(),
            response_time: elapsed_ms(started),
            timestamp: Utc::now(),
        })
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Frames to write for a global frame: queued direct frames emitted before
/// it, then the global frame itself. A direct frame that must follow the
/// global frame is held for the next turn.
fn ordered_before(
    global: Frame,
    held: &mut Option<Frame>,
    direct_rx: &mut mpsc::Receiver<Frame>,
) -> Vec<Utf8Bytes> {
    let mut outgoing = Vec::new();
    while let Some(direct) = held.take().or_else(|| direct_rx.try_recv().ok()) {
        if !direct.precedes(&global) {
            *held = Some(direct);
            break;
        }
        outgoing.push(direct.text);
    }
    outgoing.push(global.text);
    outgoing
}

/// The held direct frame, else the next one from the queue.
async fn next_direct(
    held: &mut Option<Frame>,
    direct_rx: &mut mpsc::Receiver<Frame>,
) -> Option<Frame> {
    match held.take() {
        Some(frame) => Some(frame),
        None => direct_rx.recv().await,
    }
}

// =============================================================================
// Tests
// =============================================================================
