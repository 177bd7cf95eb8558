//! Cache Refresh Background Task
//!
//! Keeps cached entries current and clears staleness after an outage. The task
//! wakes up on three triggers:
//!
//! - the refresh interval elapsing: every cached key is re-fetched
//! - a fired backend watch: the affected key is re-fetched (or dropped if the
//!   node was deleted)
//! - the health monitor reporting a re-established session: an immediate
//!   refresh pass, without waiting for the next tick
//!
//! While the monitor reports `Disconnected`, a pass first tries to reconnect
//! and does nothing else if that fails.
//!
//! # Guarantees
//!
//! - A failed refresh leaves the entry untouched; staleness is only ever set
//!   by the health monitor.
//! - At most one refresh per key is in flight at any time.
//! - Every backend call is bounded by the read (or connect) timeout, and a
//!   pass runs at most `max_concurrent` refreshes at once.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use occ_core::{
    BackendError, BackendResult, CacheKey, CachedValue, ConnectionState, NodePath, OccConfig,
    ReadError,
};
use occ_storage::{
    with_timeout, Backend, CacheStore, ConnectionHealthMonitor, WatchEvent, WatchEventKind,
};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval, MissedTickBehavior};

use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_MAX_CONCURRENT_REFRESHES, DEFAULT_READ_TIMEOUT_MS,
    DEFAULT_REFRESH_INTERVAL_MS,
};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the refresh background task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshConfig {
    /// Period between full refresh passes (default: 1 second)
    pub interval: Duration,
    /// Bound on each per-key fetch (default: 10 seconds)
    pub read_timeout: Duration,
    /// Bound on a reconnect attempt (default: 30 seconds)
    pub connect_timeout: Duration,
    /// Refreshes running at once within one pass (default: 16)
    pub max_concurrent: usize,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_REFRESH_INTERVAL_MS),
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            max_concurrent: DEFAULT_MAX_CONCURRENT_REFRESHES,
        }
    }
}

impl From<&OccConfig> for RefreshConfig {
    fn from(config: &OccConfig) -> Self {
        Self {
            interval: config.refresh_interval,
            read_timeout: config.read_timeout,
            connect_timeout: config.connect_timeout,
            max_concurrent: config.max_concurrent_refreshes.max(1),
        }
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters for refresh activity since startup.
#[derive(Debug, Default)]
pub struct RefreshMetrics {
    /// Refresh passes started
    pub ticks: AtomicU64,
    /// Keys successfully re-fetched
    pub refreshed: AtomicU64,
    /// Re-fetches that failed and left their entry untouched
    pub failed: AtomicU64,
    /// Entries dropped because the node no longer exists
    pub removed: AtomicU64,
    /// Refreshes skipped because one was already in flight for the key
    pub skipped_in_flight: AtomicU64,
    /// Attempts to re-establish a session
    pub reconnect_attempts: AtomicU64,
    /// Refreshes triggered by a fired watch
    pub watch_events: AtomicU64,
}

impl RefreshMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> RefreshSnapshot {
        RefreshSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            refreshed: self.refreshed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
            skipped_in_flight: self.skipped_in_flight.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            watch_events: self.watch_events.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of refresh metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSnapshot {
    pub ticks: u64,
    pub refreshed: u64,
    pub failed: u64,
    pub removed: u64,
    pub skipped_in_flight: u64,
    pub reconnect_attempts: u64,
    pub watch_events: u64,
}

// ============================================================================
// SCHEDULER
// ============================================================================

/// What happened to one key during a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed,
    Removed,
    Failed,
    SkippedInFlight,
    /// The key is no longer cached.
    NotCached,
}

/// Tally of one refresh pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// The session was down and could not be re-established.
    pub offline: bool,
    pub refreshed: u64,
    pub removed: u64,
    pub failed: u64,
    pub skipped: u64,
}

/// Releases a key's in-flight slot when the refresh finishes or is dropped.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<CacheKey>>,
    key: CacheKey,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock_in_flight(self.in_flight).remove(&self.key);
    }
}

fn lock_in_flight(
    in_flight: &Mutex<HashSet<CacheKey>>,
) -> std::sync::MutexGuard<'_, HashSet<CacheKey>> {
    in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Re-fetches cached keys through the backend.
pub struct RefreshScheduler {
    backend: Arc<dyn Backend>,
    store: Arc<CacheStore>,
    monitor: Arc<ConnectionHealthMonitor>,
    config: RefreshConfig,
    metrics: Arc<RefreshMetrics>,
    in_flight: Mutex<HashSet<CacheKey>>,
}

impl RefreshScheduler {
    pub fn new(
        backend: Arc<dyn Backend>,
        store: Arc<CacheStore>,
        monitor: Arc<ConnectionHealthMonitor>,
        config: RefreshConfig,
    ) -> Self {
        Self {
            backend,
            store,
            monitor,
            config,
            metrics: Arc::new(RefreshMetrics::new()),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<RefreshMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Run one refresh pass over every cached key.
    ///
    /// With `rearm` set, each successfully refreshed key also gets its watch
    /// re-armed; used after a session was re-established, since an expired
    /// session drops all watches.
    pub async fn run_pass(&self, mut rearm: bool) -> PassSummary {
        self.metrics.ticks.fetch_add(1, Ordering::Relaxed);
        let mut summary = PassSummary::default();

        if !self.monitor.is_connected() {
            if !self.reconnect().await {
                summary.offline = true;
                return summary;
            }
            rearm = true;
        }

        let entries = match self.store.entries() {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(error = %e, "Failed to snapshot cache entries");
                return summary;
            }
        };

        let outcomes: Vec<RefreshOutcome> = stream::iter(entries)
            .map(|entry| {
                let key = entry.key.clone();
                async move { self.refresh_key(key, rearm).await }
            })
            .buffer_unordered(self.config.max_concurrent.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                RefreshOutcome::Refreshed => summary.refreshed += 1,
                RefreshOutcome::Removed => summary.removed += 1,
                RefreshOutcome::Failed => summary.failed += 1,
                RefreshOutcome::SkippedInFlight => summary.skipped += 1,
                RefreshOutcome::NotCached => {}
            }
        }

        if summary.failed > 0 || summary.removed > 0 {
            tracing::info!(
                refreshed = summary.refreshed,
                removed = summary.removed,
                failed = summary.failed,
                skipped = summary.skipped,
                "Cache refresh pass completed"
            );
        } else {
            tracing::trace!(refreshed = summary.refreshed, "Cache refresh pass completed");
        }

        summary
    }

    /// Try to re-establish the session. Returns whether it succeeded.
    async fn reconnect(&self) -> bool {
        self.metrics.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
        let result = with_timeout(
            &NodePath::root(),
            self.config.connect_timeout,
            self.backend.connect(),
        )
        .await;
        if let Err(e) = self.monitor.observe(&result) {
            tracing::error!(error = %e, "Health transition failed");
        }
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "Reconnect attempt failed; skipping refresh pass");
                false
            }
        }
    }

    /// Re-fetch a single cached key.
    pub async fn refresh_key(&self, key: CacheKey, rearm: bool) -> RefreshOutcome {
        if !lock_in_flight(&self.in_flight).insert(key.clone()) {
            self.metrics.skipped_in_flight.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(key = %key, "Refresh already in flight");
            return RefreshOutcome::SkippedInFlight;
        }
        let _guard = InFlightGuard {
            in_flight: &self.in_flight,
            key: key.clone(),
        };

        let fetch_epoch = match self.store.current_epoch() {
            Ok(epoch) => epoch,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Failed to read cache epoch");
                self.metrics.failed.fetch_add(1, Ordering::Relaxed);
                return RefreshOutcome::Failed;
            }
        };

        let result =
            with_timeout(&key.path, self.config.read_timeout, self.backend.fetch(&key)).await;
        self.observe(&key, &result).await;

        match result {
            Ok(value) => match self.store_refreshed(&key, value, fetch_epoch) {
                Ok(false) => RefreshOutcome::NotCached,
                Ok(true) => {
                    self.metrics.refreshed.fetch_add(1, Ordering::Relaxed);
                    if rearm {
                        self.arm_watch(&key).await;
                    }
                    RefreshOutcome::Refreshed
                }
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "Failed to store refreshed value");
                    self.metrics.failed.fetch_add(1, Ordering::Relaxed);
                    RefreshOutcome::Failed
                }
            },
            Err(BackendError::NoNode { .. }) => self.remove(&key),
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "Refresh failed; keeping cached value");
                self.metrics.failed.fetch_add(1, Ordering::Relaxed);
                RefreshOutcome::Failed
            }
        }
    }

    /// Feed a per-key result to the monitor. A timeout on one key only counts
    /// against the session if the session itself fails to answer.
    async fn observe<T: Sync>(&self, key: &CacheKey, result: &BackendResult<T>) {
        let observed = self
            .monitor
            .observe_checked(result, self.backend.as_ref(), self.config.connect_timeout)
            .await;
        if let Err(e) = observed {
            tracing::error!(key = %key, error = %e, "Health transition failed");
        }
    }

    /// Full pass that also re-arms watches, for when fired watches may have
    /// been missed.
    pub async fn resync(&self) -> PassSummary {
        self.run_pass(true).await
    }

    /// Unchanged values only have their freshness re-confirmed. Returns false
    /// if the entry was dropped while the fetch was in flight.
    fn store_refreshed(
        &self,
        key: &CacheKey,
        value: CachedValue,
        fetch_epoch: u64,
    ) -> Result<bool, ReadError> {
        match self.store.peek(key)? {
            Some(existing) if *existing.value == value => {
                self.store.mark_path_fresh(key, fetch_epoch)
            }
            Some(_) => self
                .store
                .put_or_update(key.clone(), value, fetch_epoch)
                .map(|_| true),
            None => Ok(false),
        }
    }

    fn remove(&self, key: &CacheKey) -> RefreshOutcome {
        match self.store.remove(key) {
            Ok(Some(_)) => {
                tracing::debug!(key = %key, "Node gone; dropped cache entry");
                self.metrics.removed.fetch_add(1, Ordering::Relaxed);
                RefreshOutcome::Removed
            }
            Ok(None) => RefreshOutcome::NotCached,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Failed to drop cache entry");
                self.metrics.failed.fetch_add(1, Ordering::Relaxed);
                RefreshOutcome::Failed
            }
        }
    }

    async fn arm_watch(&self, key: &CacheKey) {
        let result =
            with_timeout(&key.path, self.config.read_timeout, self.backend.watch(key)).await;
        self.observe(key, &result).await;
        if let Err(e) = result {
            tracing::debug!(key = %key, error = %e, "Could not re-arm watch");
        }
    }

    /// React to a fired watch.
    pub async fn handle_watch_event(&self, event: WatchEvent) -> RefreshOutcome {
        self.metrics.watch_events.fetch_add(1, Ordering::Relaxed);
        match self.store.contains(&event.key) {
            Ok(true) => {}
            Ok(false) => return RefreshOutcome::NotCached,
            Err(e) => {
                tracing::error!(key = %event.key, error = %e, "Failed to check cache");
                return RefreshOutcome::Failed;
            }
        }
        match event.kind {
            WatchEventKind::Deleted => self.remove(&event.key),
            WatchEventKind::Changed => self.refresh_key(event.key, true).await,
        }
    }
}

impl std::fmt::Debug for RefreshScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshScheduler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Background task that keeps the cache warm until shutdown is signalled.
///
/// Watch events and health transitions are subscribed to when this function
/// is called, not when the returned future is first polled, so nothing that
/// happens between spawning and the first poll is missed.
///
/// # Example
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = tokio::spawn(refresh_task(Arc::clone(&scheduler), shutdown_rx));
///
/// // Later, trigger shutdown
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await?;
/// ```
pub fn refresh_task(
    scheduler: Arc<RefreshScheduler>,
    shutdown_rx: watch::Receiver<bool>,
) -> impl Future<Output = Arc<RefreshMetrics>> + Send {
    let events = scheduler.backend.watch_events();
    let health_rx = scheduler.monitor.subscribe();
    refresh_loop(scheduler, shutdown_rx, events, health_rx)
}

async fn refresh_loop(
    scheduler: Arc<RefreshScheduler>,
    mut shutdown_rx: watch::Receiver<bool>,
    mut events: broadcast::Receiver<WatchEvent>,
    mut health_rx: watch::Receiver<ConnectionState>,
) -> Arc<RefreshMetrics> {
    let mut ticker = interval(scheduler.config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut events_open = true;
    let mut health_open = true;

    tracing::info!(
        interval_ms = scheduler.config.interval.as_millis() as u64,
        read_timeout_ms = scheduler.config.read_timeout.as_millis() as u64,
        max_concurrent = scheduler.config.max_concurrent,
        "Cache refresh task started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Cache refresh task shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                scheduler.run_pass(false).await;
                // A reconnect made by this pass is already handled.
                health_rx.mark_unchanged();
            }

            event = events.recv(), if events_open => match event {
                Ok(event) => {
                    scheduler.handle_watch_event(event).await;
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Watch events dropped; running a full refresh");
                    scheduler.resync().await;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    events_open = false;
                }
            },

            changed = health_rx.changed(), if health_open => {
                if changed.is_err() {
                    health_open = false;
                } else if health_rx.borrow_and_update().is_connected() {
                    tracing::debug!("Session re-established; refreshing immediately");
                    scheduler.run_pass(true).await;
                }
            }
        }
    }

    let snapshot = scheduler.metrics.snapshot();
    tracing::info!(
        ticks = snapshot.ticks,
        refreshed = snapshot.refreshed,
        failed = snapshot.failed,
        removed = snapshot.removed,
        skipped_in_flight = snapshot.skipped_in_flight,
        reconnect_attempts = snapshot.reconnect_attempts,
        "Cache refresh task completed"
    );

    scheduler.metrics()
}
