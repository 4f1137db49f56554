//! Currency Stream Binary
//!
//! Starts the rate poller, the HTTP server, and the live channel.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin currency-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `UPSTREAM_URL`: Upstream snapshot endpoint
//! - `UPSTREAM_TOKEN` (or `TOKEN`): Bearer credential for the upstream
//!
//! ## Optional
//! - `PORT`: HTTP and live-channel port (default: 3000)
//! - `POLL_INTERVAL_SECS`: Poll interval (default: 5)
//! - `UPSTREAM_TIMEOUT_MS`: Upstream fetch timeout (default: 4000, must be below the poll interval)
//! - `REDIS_URL`: Redis cache; unset uses the in-memory cache
//! - `LOG_FORMAT`: "json" for JSON log lines
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use anyhow::Context;
use currency_stream::application::ports::{CacheBackend, EventSink, UpstreamSource};
use currency_stream::infrastructure::telemetry;
use currency_stream::{
    AppState, CacheStore, ConnectionHub, FanoutBroadcaster, HttpServer, HttpUpstreamClient,
    HubConfig, IngestionPoller, LiveChannel, MemoryCache, QuoteQueryService, RedisCache,
    ServiceConfig, SubscriptionRegistry, SyncStatus, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (tracing + optional OpenTelemetry)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting currency stream");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = ServiceConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Cache backend
    let backend: Arc<dyn CacheBackend> = match &config.cache.redis_url {
        Some(url) => Arc::new(
            RedisCache::connect(url)
                .await
                .context("failed to connect to Redis")?,
        ),
        None => {
            tracing::warn!("REDIS_URL not set, using in-process cache");
            Arc::new(MemoryCache::new())
        }
    };
    let cache = CacheStore::new(backend, config.cache.policy());

    // Live channel plumbing
    let registry = Arc::new(SubscriptionRegistry::with_max_codes(
        config.live.max_codes_per_subscription,
    ));
    let hub = Arc::new(ConnectionHub::new(HubConfig::from(&config.live)));
    let sink: Arc<dyn EventSink> = hub.clone();
    let broadcaster = Arc::new(FanoutBroadcaster::new(
        sink,
        Arc::clone(&registry),
        config.live.fanout(),
    ));

    // Ingestion
    let upstream: Arc<dyn UpstreamSource> = Arc::new(
        HttpUpstreamClient::new(&config.upstream).context("failed to build upstream client")?,
    );
    let sync_status = Arc::new(SyncStatus::new());
    let poller = Arc::new(IngestionPoller::new(
        upstream,
        cache.clone(),
        broadcaster,
        Arc::clone(&sync_status),
        config.poll.interval,
    ));

    // Read side
    let query = QuoteQueryService::new(cache, Arc::clone(&registry), sync_status);
    let live = LiveChannel::new(hub, registry, query.clone());
    let http_server = HttpServer::new(
        config.server.port,
        AppState::new(query, live),
        shutdown_token.clone(),
    );

    // Warm the cache before the first tick
    let outcome = poller.run_cycle().await;
    tracing::info!(?outcome, "Initial poll cycle finished");

    let poller_cancel = shutdown_token.clone();
    let poller_task = tokio::spawn(Arc::clone(&poller).run(poller_cancel));

    let server_task = tokio::spawn(http_server.run());

    tracing::info!("Currency stream ready");

    tokio::select! {
        () = await_shutdown() => {}
        result = server_task => {
            match result {
                Ok(Ok(())) => tracing::warn!("HTTP server exited"),
                Ok(Err(e)) => tracing::error!(error = %e, "HTTP server error"),
                Err(e) => tracing::error!(error = %e, "HTTP server task panicked"),
            }
        }
    }

    shutdown_token.cancel();
    if let Err(e) = poller_task.await {
        tracing::error!(error = %e, "Poller task panicked");
    }

    tracing::info!("Currency stream stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &ServiceConfig) {
    tracing::info!(
        port = config.server.port,
        poll_interval_secs = config.poll.interval.as_secs_f64(),
        upstream_timeout_ms = config.upstream.timeout.as_millis(),
        cache = if config.cache.redis_url.is_some() { "redis" } else { "memory" },
        "Configuration loaded"
    );
    tracing::debug!(upstream_url = %config.upstream.url, "Upstream endpoint");
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
