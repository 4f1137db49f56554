//! HTTP Server
//!
//! Read endpoints, probes, Prometheus metrics, and the live-channel upgrade,
//! all on one listener. Every read is served from the cache.
//!
//! # Endpoints
//!
//! - `GET /` - Full cached snapshot
//! - `GET /currencies?codes=A,B` - Cached records for the listed codes
//! - `POST /currencies/bulk` - Same, with `{"currencies": [...]}` in the body
//! - `GET /health` - JSON health report (503 when unhealthy)
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (ready once a snapshot is cached)
//! - `GET /stats` - Live-channel registry statistics
//! - `GET /metrics` - Prometheus metrics in text format
//! - `GET /currency-stream` - Live-channel WebSocket upgrade

use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::application::services::{QueryError, QuoteQueryService};
use crate::domain::events::{CurrencyList, HealthReport, HealthStatus};
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::websocket::LiveChannel;

/// Path of the live-channel upgrade endpoint.
pub const LIVE_CHANNEL_PATH: &str = "/currency-stream";

// =============================================================================
// State
// =============================================================================

/// Shared state for the HTTP handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    query: QuoteQueryService,
    live: LiveChannel,
}

impl AppState {
    /// Create handler state.
    #[must_use]
    pub const fn new(query: QuoteQueryService, live: LiveChannel) -> Self {
        Self { query, live }
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// A cache-served body with timing metadata.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CachedResponse<T> {
    #[serde(flatten)]
    body: T,
    response_time: u64,
    cached: bool,
    timestamp: DateTime<Utc>,
}

impl<T> CachedResponse<T> {
    fn new(body: T, started: Instant) -> Self {
        Self {
            body,
            response_time: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            cached: true,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    #[serde(flatten)]
    health: HealthReport,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    status_code: u16,
    error: &'static str,
    message: String,
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
            Self::CacheUnavailable(e) => {
                tracing::error!(error = %e, "Cache read failed");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Currency cache unavailable".to_string(),
                )
            }
        };
        let body = ErrorBody {
            status_code: status.as_u16(),
            error: status.canonical_reason().unwrap_or("Error"),
            message,
        };
        (status, Json(body)).into_response()
    }
}

/// `?codes=A,B` query string.
#[derive(Debug, Default, Deserialize)]
pub struct CodesQuery {
    /// Comma-separated codes.
    #[serde(default)]
    pub codes: Option<String>,
}

impl CodesQuery {
    /// Split into trimmed, non-empty codes.
    #[must_use]
    pub fn split(&self) -> Vec<String> {
        self.codes
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect()
    }
}

// =============================================================================
// Router
// =============================================================================

/// Build the application router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(all_currencies_handler))
        .route("/currencies", get(currencies_handler))
        .route("/currencies/bulk", post(bulk_handler))
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/stats", get(stats_handler))
        .route("/metrics", get(metrics_handler))
        .route(LIVE_CHANNEL_PATH, get(live_channel_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

// =============================================================================
// HTTP Server
// =============================================================================

/// HTTP and live-channel server.
#[derive(Debug)]
pub struct HttpServer {
    port: u16,
    state: AppState,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Create a new server.
    #[must_use]
    pub const fn new(port: u16, state: AppState, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "HTTP server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    /// Failed to bind to port.
    #[error("failed to bind HTTP server to port {0}: {1}")]
    BindFailed(u16, String),

    /// HTTP server failed while running.
    #[error("HTTP server failed: {0}")]
    ServerFailed(String),
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn all_currencies_handler(State(state): State<AppState>) -> Result<Response, QueryError> {
    let started = Instant::now();
    let all = state.query.all_currencies().await?;
    Ok(Json(CachedResponse::new(all, started)).into_response())
}

async fn currencies_handler(
    State(state): State<AppState>,
    Query(query): Query<CodesQuery>,
) -> Result<Response, QueryError> {
    bulk_response(&state, &query.split()).await
}

async fn bulk_handler(
    State(state): State<AppState>,
    Json(list): Json<CurrencyList>,
) -> Result<Response, QueryError> {
    bulk_response(&state, &list.currencies).await
}

async fn bulk_response(state: &AppState, codes: &[String]) -> Result<Response, QueryError> {
    let started = Instant::now();
    let lookup = state.query.bulk_currencies(codes).await?;
    tracing::debug!(
        requested = lookup.requested,
        found = lookup.found,
        "Bulk lookup served"
    );
    Ok(Json(CachedResponse::new(lookup, started)).into_response())
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.query.health().await;
    let status_code = match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (
        status_code,
        Json(HealthResponse {
            health,
            timestamp: Utc::now(),
        }),
    )
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<AppState>) -> impl IntoResponse {
    // Ready once a snapshot is cached
    if state.query.health().await.cache_active {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.query.stats())
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

async fn live_channel_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let live = state.live.clone();
    ws.on_upgrade(move |socket| live.serve(socket))
}

// =============================================================================
// Tests
// =============================================================================
