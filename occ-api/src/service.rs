//! Read Service
//!
//! The request-handling surface of the observer cache: `get`, `get_v` and
//! `children`. Every read consults the [`CacheStore`] first; a miss falls
//! through to the [`Backend`] under the read timeout, feeds the outcome to the
//! [`ConnectionHealthMonitor`], stores the value and arms a watch so later
//! changes reach the refresh scheduler.
//!
//! Hits never touch the backend, so cached values (stale or not) keep being
//! served through an outage and after shutdown has begun.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use occ_core::{BackendError, BackendResult, CacheKey, NodePath, ReadError, ZkChildren, ZkNode};
use occ_storage::{
    with_timeout, Backend, CacheRead, CacheStats, CacheStore, ConnectionHealthMonitor,
};

pub struct ReadService {
    backend: Arc<dyn Backend>,
    store: Arc<CacheStore>,
    monitor: Arc<ConnectionHealthMonitor>,
    read_timeout: Duration,
    shutting_down: AtomicBool,
}

impl ReadService {
    pub fn new(
        backend: Arc<dyn Backend>,
        store: Arc<CacheStore>,
        monitor: Arc<ConnectionHealthMonitor>,
        read_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            store,
            monitor,
            read_timeout,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Read one node's data and stat.
    pub async fn get(&self, path: &str) -> Result<ZkNode, ReadError> {
        let key = CacheKey::data(NodePath::new(path)?);
        self.read_through(key).await?.into_node()
    }

    /// Read several nodes at once.
    ///
    /// The result has the same length and order as `paths`; each slot
    /// resolves independently, so one failure never hides the other results.
    pub async fn get_v<S: AsRef<str>>(&self, paths: &[S]) -> Vec<Result<ZkNode, ReadError>> {
        join_all(paths.iter().map(|path| self.get(path.as_ref()))).await
    }

    /// Read a node's child names, in the order the backend returned them.
    pub async fn children(&self, path: &str) -> Result<ZkChildren, ReadError> {
        let key = CacheKey::children(NodePath::new(path)?);
        self.read_through(key).await?.into_children()
    }

    async fn read_through(&self, key: CacheKey) -> Result<CacheRead, ReadError> {
        if let Some(hit) = self.store.lookup(&key)? {
            return Ok(hit);
        }
        if self.is_shutting_down() {
            return Err(ReadError::ShuttingDown);
        }

        let fetch_epoch = self.store.current_epoch()?;
        let result = with_timeout(&key.path, self.read_timeout, self.backend.fetch(&key)).await;
        if self.closed_by_shutdown(&result) {
            return Err(ReadError::ShuttingDown);
        }
        self.monitor
            .observe_checked(&result, self.backend.as_ref(), self.read_timeout)
            .await?;

        let value = match result {
            Ok(value) => value,
            Err(err) => {
                if err.is_connectivity_loss() {
                    // A concurrent reader may have populated the entry while
                    // this fetch was failing.
                    if let Some(hit) = self.store.lookup(&key)? {
                        return Ok(hit);
                    }
                }
                tracing::debug!(key = %key, error = %err, "Backend read failed on cache miss");
                return Err(ReadError::from_backend(key.path.as_str(), &err));
            }
        };

        let read = self.store.put_or_update(key.clone(), value, fetch_epoch)?;
        tracing::trace!(key = %key, cached = read.is_cached(), "Populated cache entry");
        self.arm_watch(&key).await;
        Ok(read)
    }

    async fn arm_watch(&self, key: &CacheKey) {
        let result = with_timeout(&key.path, self.read_timeout, self.backend.watch(key)).await;
        if self.closed_by_shutdown(&result) {
            return;
        }
        let observed = self
            .monitor
            .observe_checked(&result, self.backend.as_ref(), self.read_timeout)
            .await;
        if let Err(err) = observed {
            tracing::error!(key = %key, error = %err, "Health transition failed");
        }
        if let Err(err) = result {
            tracing::debug!(key = %key, error = %err, "Could not arm watch");
        }
    }

    /// The session was closed by our own shutdown, not lost.
    fn closed_by_shutdown<T>(&self, result: &BackendResult<T>) -> bool {
        matches!(result, Err(BackendError::Closed)) && self.is_shutting_down()
    }

    /// Refuse backend reads from now on. Cache hits are still served.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> Result<CacheStats, ReadError> {
        self.store.stats()
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn monitor(&self) -> &Arc<ConnectionHealthMonitor> {
        &self.monitor
    }
}

impl std::fmt::Debug for ReadService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadService")
            .field("read_timeout", &self.read_timeout)
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use occ_core::ConnectionState;
    use occ_storage::InMemoryBackend;

    fn setup() -> (Arc<InMemoryBackend>, ReadService) {
        let backend = Arc::new(InMemoryBackend::new());
        backend
            .create_all(&NodePath::new("/a/b").unwrap(), "X")
            .unwrap();
        let store = Arc::new(CacheStore::new());
        let monitor = Arc::new(ConnectionHealthMonitor::new(Arc::clone(&store)));
        let service = ReadService::new(backend.clone(), store, monitor, Duration::from_secs(1));
        (backend, service)
    }

    #[tokio::test]
    async fn test_first_get_is_uncached_then_cached() {
        let (_backend, service) = setup();

        let first = service.get("/a/b").await.unwrap();
        assert_eq!(first.data, b"X".to_vec());
        assert!(!first.cached);
        assert!(!first.stale);

        let second = service.get("/a/b").await.unwrap();
        assert_eq!(second.data, first.data);
        assert_eq!(second.stat, first.stat);
        assert!(second.cached);
        assert!(!second.stale);

        assert_eq!(service.monitor().state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_miss_arms_watch() {
        let (backend, service) = setup();
        service.get("/a/b").await.unwrap();
        service.children("/a").await.unwrap();
        assert_eq!(backend.armed_watch_count(), 2);
    }

    #[tokio::test]
    async fn test_hit_does_not_touch_backend() {
        let (backend, service) = setup();
        service.get("/a/b").await.unwrap();
        let calls = backend.call_count();
        service.get("/a/b").await.unwrap();
        assert_eq!(backend.call_count(), calls);
    }

    #[tokio::test]
    async fn test_invalid_path() {
        let (_backend, service) = setup();
        let err = service.get("a/b/").await.unwrap_err();
        assert!(matches!(err, ReadError::InvalidPath { .. }));
    }

    #[tokio::test]
    async fn test_not_found_is_not_cached() {
        let (_backend, service) = setup();
        let err = service.get("/missing").await.unwrap_err();
        assert_eq!(
            err,
            ReadError::NotFound {
                path: "/missing".to_string()
            }
        );
        let key = CacheKey::data(NodePath::new("/missing").unwrap());
        assert!(!service.store().contains(&key).unwrap());
        assert_eq!(service.monitor().state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_shutdown_serves_hits_only() {
        let (_backend, service) = setup();
        service.get("/a/b").await.unwrap();
        service.begin_shutdown();

        assert!(service.get("/a/b").await.unwrap().cached);
        assert_eq!(service.get("/a").await.unwrap_err(), ReadError::ShuttingDown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_path_does_not_drop_session() {
        let (backend, service) = setup();
        service.get("/a/b").await.unwrap();
        backend.create(&NodePath::new("/a/c").unwrap(), "Y").unwrap();
        backend.set_path_latency(&NodePath::new("/a/c").unwrap(), Duration::from_secs(5));

        let err = service.get("/a/c").await.unwrap_err();
        assert!(matches!(err, ReadError::Timeout { .. }));
        assert_eq!(service.monitor().state(), ConnectionState::Connected);

        let cached = service.get("/a/b").await.unwrap();
        assert!(cached.cached);
        assert!(!cached.stale);
    }

    #[tokio::test]
    async fn test_children_slot_is_separate() {
        let (_backend, service) = setup();
        service.get("/a").await.unwrap();
        let children = service.children("/a").await.unwrap();
        assert!(!children.cached);
        assert_eq!(children.children, vec!["b".to_string()]);
        assert_eq!(children.num_children(), 1);
    }
}
