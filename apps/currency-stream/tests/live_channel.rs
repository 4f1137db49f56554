//! Live Channel Integration Tests
//!
//! Serves the router on a local port and drives it with WebSocket clients.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use currency_stream::{
    AppState, CachePolicy, CacheStore, ConnectionHub, FanoutBroadcaster, FanoutConfig,
    InstrumentQuote, LiveChannel, MemoryCache, QuoteQueryService, Snapshot,
    SubscriptionRegistry, SyncStatus, router,
};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Harness {
    addr: SocketAddr,
    cache: CacheStore,
    registry: Arc<SubscriptionRegistry>,
    broadcaster: FanoutBroadcaster,
}

fn quote(code: &str) -> InstrumentQuote {
    InstrumentQuote {
        code: code.to_string(),
        usd_buy: Decimal::ONE,
        inr_buy: Decimal::new(8310, 2),
        usd_sell: Decimal::ONE,
        inr_sell: Decimal::new(8340, 2),
        observed_at: "2026-10-15 09:00:00".to_string(),
    }
}

fn snapshot() -> Snapshot {
    Snapshot::new(vec![quote("USD"), quote("BTC"), quote("EUR")], Utc::now())
}

/// Start the router on a random local port.
async fn setup() -> Harness {
    let cache = CacheStore::new(Arc::new(MemoryCache::new()), CachePolicy::default());
    cache.write_snapshot(&snapshot()).await.unwrap();

    let registry = Arc::new(SubscriptionRegistry::new());
    let hub = Arc::new(ConnectionHub::with_defaults());
    let broadcaster =
        FanoutBroadcaster::new(hub.clone(), Arc::clone(&registry), FanoutConfig::default());
    let query = QuoteQueryService::new(
        cache.clone(),
        Arc::clone(&registry),
        Arc::new(SyncStatus::new()),
    );
    let live = LiveChannel::new(hub, Arc::clone(&registry), query.clone());
    let app = router(AppState::new(query, live));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Harness {
        addr,
        cache,
        registry,
        broadcaster,
    }
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}/currency-stream"))
        .await
        .unwrap();
    client
}

async fn send(client: &mut Client, frame: Value) {
    client.send(Message::text(frame.to_string())).await.unwrap();
}

/// Next text frame, parsed.
async fn recv(client: &mut Client) -> Value {
    loop {
        let message = timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timed out waiting for frame")
            .unwrap()
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Assert no text frame arrives within a short window.
async fn assert_quiet(client: &mut Client) {
    if let Ok(Some(Ok(Message::Text(text)))) =
        timeout(Duration::from_millis(200), client.next()).await
    {
        panic!("unexpected frame: {}", text.as_str());
    }
}

async fn subscribe(client: &mut Client, codes: &[&str]) -> Value {
    send(
        client,
        json!({"event": "subscribe-currencies", "data": {"currencies": codes}}),
    )
    .await;
    recv(client).await
}

#[tokio::test]
async fn subscriber_gets_topic_update_after_global() {
    let harness = setup().await;
    let mut subscriber = connect(harness.addr).await;
    let mut bystander = connect(harness.addr).await;

    let confirmed = subscribe(&mut subscriber, &["BTC"]).await;
    assert_eq!(confirmed["event"], "subscription-confirmed");
    assert_eq!(confirmed["data"]["count"], 1);

    // Round trip so the bystander's session is known to be registered.
    send(&mut bystander, json!({"event": "get-health-status"})).await;
    let health = recv(&mut bystander).await;
    assert_eq!(health["event"], "health-status-response");
    assert_eq!(health["data"]["websocket"]["activeConnections"], 2);

    let report = harness.broadcaster.broadcast_snapshot(&snapshot()).await;
    assert_eq!(report.global_receivers, 2);
    assert_eq!(report.topic_deliveries, 1);

    let global = recv(&mut subscriber).await;
    assert_eq!(global["event"], "currency-update");
    assert_eq!(global["data"]["type"], "live-update");
    assert_eq!(global["data"]["count"], 3);

    let specific = recv(&mut subscriber).await;
    assert_eq!(specific["event"], "currency-specific-update");
    assert_eq!(specific["data"]["currency"], "BTC");
    assert_eq!(specific["data"]["data"]["INRBuy"], "83.10");
    assert_quiet(&mut subscriber).await;

    let global = recv(&mut bystander).await;
    assert_eq!(global["event"], "currency-update");
    assert_quiet(&mut bystander).await;
}

#[tokio::test]
async fn back_to_back_broadcasts_arrive_in_emission_order() {
    let harness = setup().await;
    let mut subscriber = connect(harness.addr).await;
    subscribe(&mut subscriber, &["BTC", "EUR"]).await;

    harness.broadcaster.broadcast_snapshot(&snapshot()).await;
    harness.broadcaster.broadcast_snapshot(&snapshot()).await;

    let mut events = Vec::new();
    for _ in 0..6 {
        let frame = recv(&mut subscriber).await;
        events.push(frame["event"].as_str().unwrap().to_string());
    }
    assert_eq!(
        events,
        [
            "currency-update",
            "currency-specific-update",
            "currency-specific-update",
            "currency-update",
            "currency-specific-update",
            "currency-specific-update",
        ]
    );
    assert_quiet(&mut subscriber).await;
}

#[tokio::test]
async fn oversized_subscription_is_rejected() {
    let harness = setup().await;
    let mut client = connect(harness.addr).await;
    subscribe(&mut client, &["USD"]).await;

    let codes: Vec<String> = (0..101).map(|i| format!("C{i:03}")).collect();
    send(
        &mut client,
        json!({"event": "subscribe-currencies", "data": {"currencies": codes}}),
    )
    .await;
    let reply = recv(&mut client).await;

    assert_eq!(reply["event"], "error");
    assert!(
        reply["data"]["message"]
            .as_str()
            .unwrap()
            .starts_with("Maximum 100 currencies")
    );
    assert_eq!(harness.registry.stats().total_subscriptions, 1);
}

#[tokio::test]
async fn request_replies_are_served_from_cache() {
    let harness = setup().await;
    let mut client = connect(harness.addr).await;

    send(
        &mut client,
        json!({"event": "get-currencies-bulk", "data": {"currencies": ["usd", "EUR", "XXX"]}}),
    )
    .await;
    let bulk = recv(&mut client).await;
    assert_eq!(bulk["event"], "currencies-bulk-response");
    assert_eq!(bulk["data"]["count"], 2);
    assert_eq!(bulk["data"]["cached"], true);

    send(&mut client, json!({"event": "get-all-currencies"})).await;
    let all = recv(&mut client).await;
    assert_eq!(all["event"], "all-currencies-response");
    assert_eq!(all["data"]["count"], 3);
    assert_eq!(
        all["data"]["lastSync"],
        harness.cache.last_sync().await.unwrap().unwrap()
    );
}

#[tokio::test]
async fn malformed_frame_does_not_close_connection() {
    let harness = setup().await;
    let mut client = connect(harness.addr).await;

    client.send(Message::text("{not json")).await.unwrap();
    let reply = recv(&mut client).await;
    assert_eq!(reply["event"], "error");

    let confirmed = subscribe(&mut client, &["USD"]).await;
    assert_eq!(confirmed["event"], "subscription-confirmed");
}

#[tokio::test]
async fn disconnect_leaves_no_stale_topic_members() {
    let harness = setup().await;
    let mut client = connect(harness.addr).await;
    subscribe(&mut client, &["BTC", "USD"]).await;
    assert_eq!(harness.registry.topic_members("BTC").len(), 1);

    client.close(None).await.unwrap();

    timeout(Duration::from_secs(2), async {
        while harness.registry.stats().active_connections > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection was not unregistered");

    assert!(harness.registry.topic_members("BTC").is_empty());
    let report = harness.broadcaster.broadcast_snapshot(&snapshot()).await;
    assert_eq!(report.topic_deliveries, 0);
}
