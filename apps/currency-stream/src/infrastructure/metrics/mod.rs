//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Cycles**: Poll cycle outcomes and durations
//! - **Cache**: Snapshot write failures and bulk memo hit rate
//! - **Live Channel**: Connection and subscription counts, frames sent and dropped
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Safe to call repeatedly; the recorder is installed once.
///
/// # Panics
///
/// Panics if another global recorder was already installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "currency_stream_cycles_total",
        "Poll cycles by outcome (published, empty, failed, skipped)"
    );
    describe_histogram!(
        "currency_stream_cycle_duration_seconds",
        "Wall time of a poll cycle from fetch to broadcast"
    );

    describe_counter!(
        "currency_stream_cache_write_failures_total",
        "Snapshot cache writes that failed"
    );
    describe_counter!(
        "currency_stream_bulk_lookups_total",
        "Bulk lookups by memo result"
    );

    describe_gauge!(
        "currency_stream_connections",
        "Open live-channel connections"
    );
    describe_gauge!(
        "currency_stream_subscriptions",
        "Total code subscriptions across connections"
    );
    describe_counter!(
        "currency_stream_messages_sent_total",
        "Frames queued to live-channel connections by event kind"
    );
    describe_counter!(
        "currency_stream_messages_dropped_total",
        "Frames dropped because a connection queue was full or closed"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for poll cycle outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleLabel {
    /// Snapshot cached and broadcast.
    Published,
    /// Upstream had no records.
    Empty,
    /// Upstream fetch failed.
    Failed,
    /// A previous cycle was still running.
    Skipped,
}

impl CycleLabel {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Published => "published",
            Self::Empty => "empty",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// Record a finished poll cycle.
pub fn record_cycle(outcome: CycleLabel, duration: Duration) {
    counter!("currency_stream_cycles_total", "outcome" => outcome.as_str()).increment(1);
    if outcome != CycleLabel::Skipped {
        histogram!("currency_stream_cycle_duration_seconds").record(duration.as_secs_f64());
    }
}

/// Record a failed snapshot cache write.
pub fn record_cache_write_failure() {
    counter!("currency_stream_cache_write_failures_total").increment(1);
}

/// Record a bulk lookup and whether the memo served it.
pub fn record_bulk_lookup(memo_hit: bool) {
    let result = if memo_hit { "memo_hit" } else { "memo_miss" };
    counter!("currency_stream_bulk_lookups_total", "result" => result).increment(1);
}

/// Update the open connection count.
#[allow(clippy::cast_precision_loss)]
pub fn set_connections(count: usize) {
    gauge!("currency_stream_connections").set(count as f64);
}

/// Update the total subscription count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(count: usize) {
    gauge!("currency_stream_subscriptions").set(count as f64);
}

/// Record frames queued to connections.
pub fn record_messages_sent(kind: &'static str, count: u64) {
    counter!("currency_stream_messages_sent_total", "kind" => kind).increment(count);
}

/// Record frames dropped for slow or closed connections.
pub fn record_messages_dropped(count: u64) {
    counter!("currency_stream_messages_dropped_total").increment(count);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_label_as_str() {
        assert_eq!(CycleLabel::Published.as_str(), "published");
        assert_eq!(CycleLabel::Empty.as_str(), "empty");
        assert_eq!(CycleLabel::Failed.as_str(), "failed");
        assert_eq!(CycleLabel::Skipped.as_str(), "skipped");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_cycle(CycleLabel::Published, Duration::from_millis(5));
        record_bulk_lookup(true);
        set_connections(3);
        record_messages_dropped(1);
    }
}
