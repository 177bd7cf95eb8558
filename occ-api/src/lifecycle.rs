//! Observer cache lifecycle: wiring, startup and shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use occ_core::{HealthCheck, NodePath, OccConfig, OccResult, ReadError, ZkChildren, ZkNode};
use occ_storage::{with_timeout, Backend, CacheStats, CacheStore, ConnectionHealthMonitor};
use serde_json::json;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::jobs::{refresh_task, RefreshConfig, RefreshMetrics, RefreshScheduler, RefreshSnapshot};
use crate::service::ReadService;

/// A running observer cache: the read service plus its refresh task.
pub struct ObserverCache {
    config: OccConfig,
    backend: Arc<dyn Backend>,
    service: Arc<ReadService>,
    scheduler: Arc<RefreshScheduler>,
    shutdown_tx: watch::Sender<bool>,
    refresh_handle: Mutex<Option<JoinHandle<Arc<RefreshMetrics>>>>,
    stopped: AtomicBool,
}

impl ObserverCache {
    /// Validate `config`, optionally connect eagerly, and spawn the refresh
    /// task. Must be called from within a tokio runtime.
    pub async fn start(config: OccConfig, backend: Arc<dyn Backend>) -> OccResult<Self> {
        config.validate()?;

        let store = Arc::new(CacheStore::new());
        let monitor = Arc::new(ConnectionHealthMonitor::new(Arc::clone(&store)));

        if config.preload {
            let result =
                with_timeout(&NodePath::root(), config.connect_timeout, backend.connect()).await;
            monitor.observe(&result)?;
            match result {
                Ok(()) => tracing::info!(
                    ensemble = %config.ensemble_addrs.join(","),
                    "Connected to ensemble at startup"
                ),
                Err(e) => tracing::warn!(
                    ensemble = %config.ensemble_addrs.join(","),
                    error = %e,
                    "Startup connect failed; will retry from the refresh task"
                ),
            }
        }

        let service = Arc::new(ReadService::new(
            Arc::clone(&backend),
            Arc::clone(&store),
            Arc::clone(&monitor),
            config.read_timeout,
        ));
        let scheduler = Arc::new(RefreshScheduler::new(
            Arc::clone(&backend),
            store,
            monitor,
            RefreshConfig::from(&config),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(refresh_task(Arc::clone(&scheduler), shutdown_rx));

        tracing::info!(
            ensemble = %config.ensemble_addrs.join(","),
            refresh_interval_ms = config.refresh_interval.as_millis() as u64,
            preload = config.preload,
            "Observer cache started"
        );

        Ok(Self {
            config,
            backend,
            service,
            scheduler,
            shutdown_tx,
            refresh_handle: Mutex::new(Some(handle)),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &OccConfig {
        &self.config
    }

    pub fn service(&self) -> &Arc<ReadService> {
        &self.service
    }

    pub async fn get(&self, path: &str) -> Result<ZkNode, ReadError> {
        self.service.get(path).await
    }

    pub async fn get_v<S: AsRef<str>>(&self, paths: &[S]) -> Vec<Result<ZkNode, ReadError>> {
        self.service.get_v(paths).await
    }

    pub async fn children(&self, path: &str) -> Result<ZkChildren, ReadError> {
        self.service.children(path).await
    }

    pub fn health(&self) -> HealthCheck {
        self.service.monitor().health_check()
    }

    pub fn cache_stats(&self) -> Result<CacheStats, ReadError> {
        self.service.stats()
    }

    pub fn refresh_metrics(&self) -> RefreshSnapshot {
        self.scheduler.metrics().snapshot()
    }

    /// Health, cache and refresh counters as one JSON document.
    pub fn status(&self) -> serde_json::Value {
        let cache = match self.cache_stats() {
            Ok(stats) => stats.to_json(),
            Err(e) => json!({ "error": e.to_string() }),
        };
        json!({
            "health": self.health(),
            "cache": cache,
            "refresh": self.refresh_metrics(),
        })
    }

    /// Stop the refresh task, refuse further backend reads and close the
    /// session. Safe to call more than once.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.refresh_handle.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Refresh task ended abnormally");
            }
        }

        self.service.begin_shutdown();
        self.service.monitor().mark_shutting_down();
        self.backend.close().await;
        tracing::info!("Observer cache shut down");
    }
}

impl std::fmt::Debug for ObserverCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverCache")
            .field("config", &self.config)
            .field("stopped", &self.stopped.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
