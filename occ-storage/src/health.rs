//! Connection health monitor.
//!
//! Tracks whether the proxy currently holds a live session with the ensemble.
//! Every backend call result is fed through [`ConnectionHealthMonitor::observe`];
//! a connectivity failure while connected flips the state to
//! [`ConnectionState::Disconnected`] and marks the whole cache stale before
//! the call returns.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use occ_core::{
    BackendError, BackendResult, ConnectionState, HealthCheck, NodePath, ReadError, Timestamp,
};
use serde::Serialize;
use tokio::sync::watch;

use crate::backend::{with_timeout, Backend};
use crate::cache::CacheStore;

const COMPONENT: &str = "ensemble_session";

/// Point-in-time view of the monitor's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub state: ConnectionState,
    /// Connected -> Disconnected transitions.
    pub disconnects: u64,
    /// Disconnected -> Connected transitions after the first session.
    pub reconnects: u64,
    pub last_transition: Option<Timestamp>,
}

#[derive(Debug)]
pub struct ConnectionHealthMonitor {
    store: Arc<CacheStore>,
    state_tx: watch::Sender<ConnectionState>,
    ever_connected: AtomicBool,
    disconnects: AtomicU64,
    reconnects: AtomicU64,
    last_transition: Mutex<Option<Timestamp>>,
    shutting_down: AtomicBool,
}

impl ConnectionHealthMonitor {
    /// Start out disconnected: no session exists until the first backend
    /// call succeeds.
    pub fn new(store: Arc<CacheStore>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            store,
            state_tx,
            ever_connected: AtomicBool::new(false),
            disconnects: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            last_transition: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Receive every state transition.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Classify a backend call result and apply the resulting transition.
    ///
    /// Errors that are not connectivity failures (missing node, auth) leave
    /// the state untouched. Returns the state after the observation.
    pub fn observe<T>(&self, result: &BackendResult<T>) -> Result<ConnectionState, ReadError> {
        let target = match result {
            Ok(_) => ConnectionState::Connected,
            Err(err) if err.is_connectivity_loss() => ConnectionState::Disconnected,
            Err(_) => return Ok(self.state()),
        };

        let mut outcome = Ok(());
        // The watch sender's lock serializes transitions; staleness is applied
        // before any subscriber can see the Disconnected state.
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == target {
                return false;
            }
            if target == ConnectionState::Disconnected {
                if let Err(err) = self.store.mark_all_stale() {
                    outcome = Err(err);
                    return false;
                }
            }
            *state = target;
            true
        });
        outcome?;

        if changed {
            self.record_transition(target, result.as_ref().err());
        }
        Ok(target)
    }

    /// Like [`observe`](Self::observe), but a `Timeout` on a live session is
    /// first checked against the session itself with a root read bounded by
    /// `check_timeout`. If the ensemble answers, the timeout is confined to
    /// the slow call and the cache is left alone.
    pub async fn observe_checked<T: Sync>(
        &self,
        result: &BackendResult<T>,
        backend: &dyn Backend,
        check_timeout: Duration,
    ) -> Result<ConnectionState, ReadError> {
        let timed_out = match result {
            Err(err @ BackendError::Timeout { .. }) => err,
            _ => return self.observe(result),
        };
        if !self.is_connected() {
            return self.observe(result);
        }

        let root = NodePath::root();
        match with_timeout(&root, check_timeout, backend.get_node(&root)).await {
            Err(err) if err.is_connectivity_loss() => self.observe(&Err::<(), _>(err)),
            _ => {
                tracing::debug!(
                    error = %timed_out,
                    "Call timed out but the session answered; keeping cache fresh"
                );
                Ok(self.state())
            }
        }
    }

    fn record_transition(&self, target: ConnectionState, cause: Option<&BackendError>) {
        if let Ok(mut last) = self.last_transition.lock() {
            *last = Some(Utc::now());
        }
        match target {
            ConnectionState::Disconnected => {
                let count = self.disconnects.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    disconnects = count,
                    cause = cause.map(|err| err.to_string()).unwrap_or_default(),
                    "Lost ensemble session; all cached entries marked stale"
                );
            }
            ConnectionState::Connected => {
                if self.ever_connected.swap(true, Ordering::Relaxed) {
                    let count = self.reconnects.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::info!(reconnects = count, "Ensemble session re-established");
                } else {
                    tracing::info!("Ensemble session established");
                }
            }
        }
    }

    /// Report the monitor as unhealthy from now on.
    pub fn mark_shutting_down(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            state: self.state(),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            last_transition: self.last_transition.lock().ok().and_then(|last| *last),
        }
    }

    pub fn health_check(&self) -> HealthCheck {
        let snapshot = self.snapshot();
        let check = if self.shutting_down.load(Ordering::Relaxed) {
            HealthCheck::unhealthy(COMPONENT, "observer cache is shutting down")
        } else if snapshot.state.is_connected() {
            HealthCheck::healthy(COMPONENT)
        } else {
            HealthCheck::degraded(COMPONENT, "no ensemble session; serving cached data as stale")
        };
        check
            .with_metadata("state", serde_json::json!(snapshot.state.to_string()))
            .with_metadata("disconnects", serde_json::json!(snapshot.disconnects))
            .with_metadata("reconnects", serde_json::json!(snapshot.reconnects))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use occ_core::{CacheKey, CachedValue, HealthStatus, NodePath, Stat};

    fn monitor() -> (Arc<CacheStore>, ConnectionHealthMonitor) {
        let store = Arc::new(CacheStore::new());
        let monitor = ConnectionHealthMonitor::new(Arc::clone(&store));
        (store, monitor)
    }

    fn loss() -> BackendResult<()> {
        Err(BackendError::ConnectionLoss {
            reason: "socket reset".to_string(),
        })
    }

    #[test]
    fn test_starts_disconnected() {
        let (_, monitor) = monitor();
        assert_eq!(monitor.state(), ConnectionState::Disconnected);
        assert_eq!(monitor.health_check().status, HealthStatus::Degraded);
    }

    #[test]
    fn test_success_connects_and_failure_marks_stale() {
        let (store, monitor) = monitor();
        let key = CacheKey::data(NodePath::new("/a").unwrap());
        store
            .put_or_update(
                key.clone(),
                CachedValue::Node {
                    data: b"X".to_vec(),
                    stat: Stat::default(),
                },
                0,
            )
            .unwrap();

        assert_eq!(monitor.observe(&Ok(())).unwrap(), ConnectionState::Connected);
        assert!(!store.lookup(&key).unwrap().unwrap().is_stale());

        assert_eq!(monitor.observe(&loss()).unwrap(), ConnectionState::Disconnected);
        assert!(store.lookup(&key).unwrap().unwrap().is_stale());
        assert_eq!(monitor.snapshot().disconnects, 1);
    }

    #[test]
    fn test_repeated_failures_do_not_bump_epoch() {
        let (store, monitor) = monitor();
        monitor.observe(&Ok(())).unwrap();
        monitor.observe(&loss()).unwrap();
        monitor.observe(&loss()).unwrap();
        monitor.observe(&Err::<(), _>(BackendError::SessionExpired)).unwrap();
        assert_eq!(store.current_epoch().unwrap(), 1);
        assert_eq!(monitor.snapshot().disconnects, 1);
    }

    #[test]
    fn test_non_connectivity_errors_leave_state() {
        let (store, monitor) = monitor();
        monitor.observe(&Ok(())).unwrap();
        let missing: BackendResult<()> = Err(BackendError::NoNode {
            path: "/gone".to_string(),
        });
        assert_eq!(monitor.observe(&missing).unwrap(), ConnectionState::Connected);
        assert_eq!(store.current_epoch().unwrap(), 0);
    }

    #[test]
    fn test_reconnect_counting() {
        let (_, monitor) = monitor();
        monitor.observe(&Ok(())).unwrap();
        monitor.observe(&loss()).unwrap();
        monitor.observe(&Ok(())).unwrap();

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.state, ConnectionState::Connected);
        assert_eq!(snapshot.disconnects, 1);
        assert_eq!(snapshot.reconnects, 1);
        assert!(snapshot.last_transition.is_some());
        assert_eq!(monitor.health_check().status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let (_, monitor) = monitor();
        let mut rx = monitor.subscribe();

        monitor.observe(&Ok(())).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Connected);

        monitor.observe(&loss()).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_on_live_session_stays_local() {
        let (store, monitor) = monitor();
        let backend = crate::memory::InMemoryBackend::new();
        let key = CacheKey::data(NodePath::new("/a").unwrap());
        store
            .put_or_update(
                key.clone(),
                CachedValue::Node {
                    data: b"X".to_vec(),
                    stat: Stat::default(),
                },
                0,
            )
            .unwrap();
        monitor.observe(&Ok(())).unwrap();

        let timed_out: BackendResult<()> = Err(BackendError::Timeout {
            path: "/a".to_string(),
            timeout: Duration::from_millis(50),
        });
        let state = monitor
            .observe_checked(&timed_out, &backend, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(state, ConnectionState::Connected);
        assert_eq!(store.current_epoch().unwrap(), 0);
        assert!(!store.lookup(&key).unwrap().unwrap().is_stale());

        backend.set_reachable(false);
        let state = monitor
            .observe_checked(&timed_out, &backend, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(state, ConnectionState::Disconnected);
        assert!(store.lookup(&key).unwrap().unwrap().is_stale());
    }

    #[test]
    fn test_shutting_down_is_unhealthy() {
        let (_, monitor) = monitor();
        monitor.observe(&Ok(())).unwrap();
        monitor.mark_shutting_down();
        assert_eq!(monitor.health_check().status, HealthStatus::Unhealthy);
    }
}
