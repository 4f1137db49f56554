//! Ingestion Cycle Integration Tests
//!
//! Cache consistency and failure isolation of the poll cycle, observed at
//! the raw cache-entry level.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::time::timeout;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use currency_stream::application::ports::FetchError;
use currency_stream::application::services::code_key;
use currency_stream::infrastructure::config::{UpstreamCredential, UpstreamSettings};
use currency_stream::{
    CacheBackend, CachePolicy, CacheStore, ConnectionHub, CycleOutcome, FanoutBroadcaster,
    FanoutConfig, HttpUpstreamClient, IngestionPoller, MemoryCache, SubscriptionRegistry,
    SyncStatus,
};

struct Harness {
    backend: Arc<MemoryCache>,
    hub: Arc<ConnectionHub>,
    poller: IngestionPoller,
    status: Arc<SyncStatus>,
    upstream: MockServer,
}

fn record(code: &str, inr_buy: &str) -> Value {
    json!({
        "CurrencyCode": code,
        "USDBuy": "1.00",
        "INRBuy": inr_buy,
        "USDSell": "1.00",
        "INRSell": inr_buy,
        "DateTime": "2026-10-15 09:00:00"
    })
}

async fn setup() -> Harness {
    let upstream = MockServer::start().await;
    let client = HttpUpstreamClient::new(&UpstreamSettings {
        url: format!("{}/rates", upstream.uri()),
        credential: UpstreamCredential::new("test-token".to_string()),
        timeout: Duration::from_secs(2),
    })
    .unwrap();

    let backend = Arc::new(MemoryCache::new());
    let cache = CacheStore::new(backend.clone(), CachePolicy::default());
    let hub = Arc::new(ConnectionHub::with_defaults());
    let broadcaster = Arc::new(FanoutBroadcaster::new(
        hub.clone(),
        Arc::new(SubscriptionRegistry::new()),
        FanoutConfig::default(),
    ));
    let status = Arc::new(SyncStatus::new());
    let poller = IngestionPoller::new(
        Arc::new(client),
        cache,
        broadcaster,
        Arc::clone(&status),
        Duration::from_secs(5),
    );

    Harness {
        backend,
        hub,
        poller,
        status,
        upstream,
    }
}

async fn respond_once(server: &MockServer, template: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path("/rates"))
        .respond_with(template)
        .up_to_n_times(1)
        .mount(server)
        .await;
}

async fn raw(backend: &MemoryCache, key: &str) -> Option<String> {
    backend.get(key).await.unwrap()
}

#[tokio::test]
async fn by_code_entries_match_snapshot() {
    let harness = setup().await;
    respond_once(
        &harness.upstream,
        ResponseTemplate::new(200).set_body_json(json!({
            "detail": [record("USD", "83.10"), record("eur", "89.95"), record("BTC", "5400000")]
        })),
    )
    .await;

    harness.poller.run_cycle().await;

    let all: Vec<Value> =
        serde_json::from_str(&raw(&harness.backend, "all").await.unwrap()).unwrap();
    assert_eq!(all.len(), 3);
    for entry in &all {
        let code = entry["CurrencyCode"].as_str().unwrap();
        let by_code: Value =
            serde_json::from_str(&raw(&harness.backend, &code_key(code)).await.unwrap()).unwrap();
        assert_eq!(&by_code, entry);
    }
    assert!(raw(&harness.backend, "by-code:EUR").await.is_some());
}

#[tokio::test]
async fn failed_cycle_leaves_cache_untouched() {
    let harness = setup().await;
    respond_once(
        &harness.upstream,
        ResponseTemplate::new(200).set_body_json(json!({
            "detail": [record("USD", "83.10"), record("EUR", "89.95")]
        })),
    )
    .await;
    respond_once(&harness.upstream, ResponseTemplate::new(500)).await;

    harness.poller.run_cycle().await;
    let keys = ["all", "last_sync", "by-code:USD", "by-code:EUR"];
    let mut before = Vec::new();
    for key in keys {
        before.push(raw(&harness.backend, key).await);
    }

    let mut handle = harness.hub.register();
    let outcome = harness.poller.run_cycle().await;

    assert!(matches!(
        outcome,
        CycleOutcome::Failed(FetchError::Status { status: 500 })
    ));
    for (key, expected) in keys.iter().zip(&before) {
        assert!(expected.is_some(), "{key} was never written");
        assert_eq!(&raw(&harness.backend, key).await, expected, "{key} changed");
    }
    assert!(!harness.status.upstream_connected());

    let frame = timeout(Duration::from_secs(1), handle.global_rx.recv())
        .await
        .unwrap()
        .unwrap();
    let notice: Value = serde_json::from_str(frame.text.as_str()).unwrap();
    assert_eq!(notice["event"], "error");
    assert_eq!(notice["data"]["type"], "fetch-error");
    assert_eq!(notice["data"]["message"], "Failed to update currency data");
}

#[tokio::test]
async fn empty_upstream_writes_nothing() {
    let harness = setup().await;
    respond_once(
        &harness.upstream,
        ResponseTemplate::new(200).set_body_json(json!({ "detail": [] })),
    )
    .await;

    let outcome = harness.poller.run_cycle().await;

    assert!(matches!(outcome, CycleOutcome::Empty));
    assert!(harness.backend.is_empty());
}

#[tokio::test]
async fn later_cycle_replaces_snapshot() {
    let harness = setup().await;
    respond_once(
        &harness.upstream,
        ResponseTemplate::new(200).set_body_json(json!({ "detail": [record("USD", "83.10")] })),
    )
    .await;
    respond_once(
        &harness.upstream,
        ResponseTemplate::new(200).set_body_json(json!({ "detail": [record("USD", "83.55")] })),
    )
    .await;

    harness.poller.run_cycle().await;
    harness.poller.run_cycle().await;

    let usd: Value =
        serde_json::from_str(&raw(&harness.backend, "by-code:USD").await.unwrap()).unwrap();
    assert_eq!(usd["INRBuy"], "83.55");
    assert_eq!(harness.status.cycles_completed(), 2);
}
