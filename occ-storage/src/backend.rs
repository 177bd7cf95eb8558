//! Coordination-store client seam.
//!
//! The cache never talks to the ensemble directly; it goes through a
//! [`Backend`]. Implementations surface connectivity problems as
//! [`BackendError`] values, which the health monitor classifies.

use async_trait::async_trait;
use occ_core::{
    BackendError, BackendResult, CacheKey, CacheSlot, CachedValue, NodePath, RawData, Stat,
};
use tokio::sync::broadcast;

/// Kind of change a fired watch reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchEventKind {
    /// Data (or the child set, for a children key) changed.
    Changed,
    /// The node no longer exists.
    Deleted,
}

/// Notification that a watched key changed on the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub key: CacheKey,
    pub kind: WatchEventKind,
}

/// Client for the hierarchical coordination store.
///
/// Calls may block on network I/O; callers bound them with timeouts.
/// Watches are one-shot: once fired, a key must be re-armed with
/// [`Backend::watch`].
#[async_trait]
pub trait Backend: Send + Sync {
    /// Establish (or re-establish) a session with the ensemble.
    async fn connect(&self) -> BackendResult<()>;

    /// Read a node's data and stat.
    async fn get_node(&self, path: &NodePath) -> BackendResult<(RawData, Stat)>;

    /// Read a node's child names (in backend order) and its stat.
    async fn get_children(&self, path: &NodePath) -> BackendResult<(Vec<String>, Stat)>;

    /// Arm a one-shot watch on a key.
    async fn watch(&self, key: &CacheKey) -> BackendResult<()>;

    /// Subscribe to fired watches.
    fn watch_events(&self) -> broadcast::Receiver<WatchEvent>;

    /// Close the session. Later calls fail with [`BackendError::Closed`].
    async fn close(&self);

    /// Read whichever observation `key` refers to.
    async fn fetch(&self, key: &CacheKey) -> BackendResult<CachedValue> {
        match key.slot {
            CacheSlot::Data => {
                let (data, stat) = self.get_node(&key.path).await?;
                Ok(CachedValue::Node { data, stat })
            }
            CacheSlot::Children => {
                let (children, stat) = self.get_children(&key.path).await?;
                Ok(CachedValue::Children { children, stat })
            }
        }
    }
}

/// Run a backend call under a deadline, reporting overruns as
/// [`BackendError::Timeout`].
pub async fn with_timeout<T, F>(
    path: &NodePath,
    timeout: std::time::Duration,
    call: F,
) -> BackendResult<T>
where
    F: std::future::Future<Output = BackendResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Timeout {
            path: path.to_string(),
            timeout,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_reports_overrun() {
        let path = NodePath::new("/slow").unwrap();
        let result: BackendResult<()> = with_timeout(&path, Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        match result {
            Err(BackendError::Timeout { path, timeout }) => {
                assert_eq!(path, "/slow");
                assert_eq!(timeout, Duration::from_millis(50));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        let path = NodePath::new("/fast").unwrap();
        let ok: BackendResult<i32> = with_timeout(&path, Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(ok, Ok(7));

        let err: BackendResult<i32> = with_timeout(&path, Duration::from_secs(1), async {
            Err(BackendError::NoNode {
                path: "/fast".to_string(),
            })
        })
        .await;
        assert!(matches!(err, Err(BackendError::NoNode { .. })));
    }
}
