//! Ingestion Poller
//!
//! Drives the fetch → normalize → cache → broadcast cycle on a fixed
//! interval. At most one cycle runs at a time; a tick that fires while a
//! cycle is in flight is skipped.
//!
//! # Cycle States
//!
//! ```text
//! Idle → Fetching → Processing → Publishing → Idle
//!          │
//!          └──── Faulted (until the next tick)
//! ```
//!
//! A failed fetch never touches the cache: the previous snapshot stays
//! authoritative until its entries expire.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::broadcaster::FanoutBroadcaster;
use super::cache_store::CacheStore;
use crate::application::ports::{FetchError, UpstreamSource};
use crate::domain::quote::Snapshot;
use crate::infrastructure::metrics::{self, CycleLabel};

/// Message carried by the fault notification sent when a cycle fails.
pub const FAULT_MESSAGE: &str = "Failed to update currency data";

// =============================================================================
// Cycle State
// =============================================================================

/// Where the poller is within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CyclePhase {
    /// Waiting for the next tick.
    Idle,
    /// Upstream request in flight.
    Fetching,
    /// Normalizing the payload.
    Processing,
    /// Writing the cache and broadcasting.
    Publishing,
    /// The last cycle failed; cleared by the next tick.
    Faulted,
}

/// Result of one call to [`IngestionPoller::run_cycle`].
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// Another cycle was in flight.
    Skipped,
    /// Upstream returned no records; nothing was cached or broadcast.
    Empty,
    /// A new snapshot was published.
    Published {
        /// Records in the snapshot.
        records: usize,
        /// Whether the cache batch write succeeded.
        cache_written: bool,
    },
    /// The upstream fetch failed.
    Failed(FetchError),
}

/// Upstream sync state shared with the health reporter.
#[derive(Debug)]
pub struct SyncStatus {
    phase: RwLock<CyclePhase>,
    upstream_ok: AtomicBool,
    last_success_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    cycles_completed: AtomicU64,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStatus {
    /// Create a status with no fetch attempted yet.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            phase: RwLock::new(CyclePhase::Idle),
            upstream_ok: AtomicBool::new(false),
            last_success_at: RwLock::new(None),
            last_error: RwLock::new(None),
            cycles_completed: AtomicU64::new(0),
        }
    }

    fn set_phase(&self, phase: CyclePhase) {
        *self.phase.write() = phase;
    }

    fn record_fetch_success(&self) {
        self.upstream_ok.store(true, Ordering::Relaxed);
        *self.last_success_at.write() = Some(Utc::now());
        *self.last_error.write() = None;
    }

    fn record_fetch_failure(&self, error: &FetchError) {
        self.upstream_ok.store(false, Ordering::Relaxed);
        *self.last_error.write() = Some(error.to_string());
        self.set_phase(CyclePhase::Faulted);
    }

    fn finish_cycle(&self) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Current cycle phase.
    #[must_use]
    pub fn phase(&self) -> CyclePhase {
        *self.phase.read()
    }

    /// Whether the most recent fetch succeeded.
    #[must_use]
    pub fn upstream_connected(&self) -> bool {
        self.upstream_ok.load(Ordering::Relaxed)
    }

    /// Time of the most recent successful fetch.
    #[must_use]
    pub fn last_success_at(&self) -> Option<DateTime<Utc>> {
        *self.last_success_at.read()
    }

    /// Error text of the most recent failed fetch, cleared on success.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Cycles that ran to a terminal state (skipped ticks excluded).
    #[must_use]
    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::Relaxed)
    }
}

/// Clears the busy flag when a cycle ends, however it ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// =============================================================================
// Ingestion Poller
// =============================================================================

/// Single-flight poll loop over an upstream source.
pub struct IngestionPoller {
    upstream: Arc<dyn UpstreamSource>,
    cache: CacheStore,
    broadcaster: Arc<FanoutBroadcaster>,
    status: Arc<SyncStatus>,
    current: RwLock<Option<Arc<Snapshot>>>,
    busy: AtomicBool,
    interval: Duration,
}

impl std::fmt::Debug for IngestionPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionPoller")
            .field("interval", &self.interval)
            .field("phase", &self.status.phase())
            .field("busy", &self.is_busy())
            .finish_non_exhaustive()
    }
}

impl IngestionPoller {
    /// Create a poller.
    #[must_use]
    pub fn new(
        upstream: Arc<dyn UpstreamSource>,
        cache: CacheStore,
        broadcaster: Arc<FanoutBroadcaster>,
        status: Arc<SyncStatus>,
        interval: Duration,
    ) -> Self {
        Self {
            upstream,
            cache,
            broadcaster,
            status,
            current: RwLock::new(None),
            busy: AtomicBool::new(false),
            interval,
        }
    }

    /// Shared sync status.
    #[must_use]
    pub fn status(&self) -> Arc<SyncStatus> {
        Arc::clone(&self.status)
    }

    /// The most recently published snapshot held in process.
    #[must_use]
    pub fn current_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.current.read().clone()
    }

    /// Whether a cycle is in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Run one cycle now, unless one is already in flight.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let Some(_guard) = BusyGuard::acquire(&self.busy) else {
            tracing::debug!("Previous cycle still running, skipping tick");
            metrics::record_cycle(CycleLabel::Skipped, Duration::ZERO);
            return CycleOutcome::Skipped;
        };

        let started = Instant::now();
        let outcome = self.cycle().await;
        let elapsed = started.elapsed();

        let label = match &outcome {
            CycleOutcome::Published {
                records,
                cache_written,
            } => {
                tracing::info!(
                    records,
                    cache_written,
                    elapsed_ms = elapsed.as_millis(),
                    "Snapshot published"
                );
                CycleLabel::Published
            }
            CycleOutcome::Empty => {
                tracing::info!(elapsed_ms = elapsed.as_millis(), "Upstream returned no records");
                CycleLabel::Empty
            }
            CycleOutcome::Failed(e) => {
                tracing::warn!(error = %e, elapsed_ms = elapsed.as_millis(), "Poll cycle failed");
                CycleLabel::Failed
            }
            CycleOutcome::Skipped => CycleLabel::Skipped,
        };

        metrics::record_cycle(label, elapsed);
        self.status.finish_cycle();
        outcome
    }

    async fn cycle(&self) -> CycleOutcome {
        self.status.set_phase(CyclePhase::Fetching);
        let payload = match self.upstream.fetch_snapshot().await {
            Ok(payload) => payload,
            Err(e) => {
                self.status.record_fetch_failure(&e);
                self.broadcaster.emit_fault(FAULT_MESSAGE);
                return CycleOutcome::Failed(e);
            }
        };
        self.status.record_fetch_success();

        self.status.set_phase(CyclePhase::Processing);
        let Some(snapshot) = payload.into_snapshot(Utc::now()) else {
            self.status.set_phase(CyclePhase::Idle);
            return CycleOutcome::Empty;
        };

        self.status.set_phase(CyclePhase::Publishing);
        let records = snapshot.len();
        let cache_written = match self.cache.write_snapshot(&snapshot).await {
            Ok(entries) => {
                tracing::debug!(entries, "Snapshot cached");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Snapshot cache write failed, entries will lapse");
                metrics::record_cache_write_failure();
                false
            }
        };

        let snapshot = Arc::new(snapshot);
        *self.current.write() = Some(Arc::clone(&snapshot));
        self.broadcaster.broadcast_snapshot(&snapshot).await;

        self.status.set_phase(CyclePhase::Idle);
        CycleOutcome::Published {
            records,
            cache_written,
        }
    }

    /// Tick until cancelled.
    ///
    /// The first tick fires one interval from now; run a cycle eagerly
    /// before calling this to warm the cache. Each tick spawns its cycle so
    /// a slow one shows up as skipped ticks rather than a drifting schedule.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(interval_secs = self.interval.as_secs_f64(), "Ingestion poller started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let poller = Arc::clone(&self);
                    tokio::spawn(async move {
                        poller.run_cycle().await;
                    });
                }
            }
        }

        tracing::info!("Ingestion poller stopped");
    }
}

// =============================================================================
// Tests
// =============================================================================
