//! In-memory coordination store.
//!
//! A single-process stand-in for the ensemble, used by tests and local runs.
//! Besides the read side of [`Backend`] it exposes the write operations other
//! clients of the ensemble would perform, and knobs that simulate the failure
//! modes the cache has to ride out: unreachable ensemble, expired session,
//! slow responses.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use occ_core::{BackendError, BackendResult, CacheKey, NodePath, RawData, Stat};
use tokio::sync::broadcast;

use crate::backend::{Backend, WatchEvent, WatchEventKind};

const WATCH_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct MemNode {
    data: RawData,
    stat: Stat,
    /// Child names in creation order.
    children: Vec<String>,
}

impl MemNode {
    fn new(data: RawData, zxid: i64) -> Self {
        let now = Utc::now();
        Self {
            stat: Stat {
                czxid: zxid,
                mzxid: zxid,
                ctime: now,
                mtime: now,
                data_length: data.len() as i32,
                pzxid: zxid,
                ..Default::default()
            },
            data,
            children: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct Tree {
    nodes: BTreeMap<NodePath, MemNode>,
    last_zxid: i64,
    armed: HashSet<CacheKey>,
}

impl Tree {
    fn next_zxid(&mut self) -> i64 {
        self.last_zxid += 1;
        self.last_zxid
    }
}

/// Backend holding the whole tree in process memory.
#[derive(Debug)]
pub struct InMemoryBackend {
    tree: Mutex<Tree>,
    events: broadcast::Sender<WatchEvent>,
    reachable: AtomicBool,
    session_expired: AtomicBool,
    closed: AtomicBool,
    latency: Mutex<Duration>,
    path_latency: Mutex<HashMap<NodePath, Duration>>,
    calls: AtomicU64,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    /// An empty tree holding only the root node.
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(NodePath::root(), MemNode::new(Vec::new(), 0));
        let (events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            tree: Mutex::new(Tree {
                nodes,
                last_zxid: 0,
                armed: HashSet::new(),
            }),
            events,
            reachable: AtomicBool::new(true),
            session_expired: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            latency: Mutex::new(Duration::ZERO),
            path_latency: Mutex::new(HashMap::new()),
            calls: AtomicU64::new(0),
        }
    }

    fn tree(&self) -> MutexGuard<'_, Tree> {
        // A panic while holding the lock leaves the tree structurally intact.
        self.tree.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn fire(&self, tree: &mut Tree, key: CacheKey, kind: WatchEventKind) {
        if tree.armed.remove(&key) {
            tracing::trace!(key = %key, ?kind, "Watch fired");
            let _ = self.events.send(WatchEvent { key, kind });
        }
    }

    // ------------------------------------------------------------------
    // Writes performed by other ensemble clients
    // ------------------------------------------------------------------

    /// Create `path`, or overwrite its data if it already exists.
    /// The parent must exist.
    pub fn create(&self, path: &NodePath, data: impl Into<RawData>) -> BackendResult<()> {
        let data = data.into();
        let mut tree = self.tree();
        let parent = match path.parent() {
            Some(parent) if !tree.nodes.contains_key(path) => parent,
            // existing nodes, the root included
            _ => {
                drop(tree);
                return self.set_data(path, data);
            }
        };
        if !tree.nodes.contains_key(&parent) {
            return Err(BackendError::NoNode {
                path: parent.to_string(),
            });
        }

        let zxid = tree.next_zxid();
        tree.nodes.insert(path.clone(), MemNode::new(data, zxid));
        if let Some(parent_node) = tree.nodes.get_mut(&parent) {
            parent_node.children.push(path.name().to_string());
            parent_node.stat.cversion += 1;
            parent_node.stat.pzxid = zxid;
            parent_node.stat.num_children = parent_node.children.len() as i32;
        }
        self.fire(&mut tree, CacheKey::children(parent), WatchEventKind::Changed);
        Ok(())
    }

    /// Create `path` and any missing ancestors (with empty data).
    pub fn create_all(&self, path: &NodePath, data: impl Into<RawData>) -> BackendResult<()> {
        let mut missing = Vec::new();
        let mut cursor = path.parent();
        while let Some(ancestor) = cursor {
            if self.exists(&ancestor) {
                break;
            }
            cursor = ancestor.parent();
            missing.push(ancestor);
        }
        for ancestor in missing.iter().rev() {
            self.create(ancestor, Vec::new())?;
        }
        self.create(path, data)
    }

    /// Replace a node's data, bumping its version.
    pub fn set_data(&self, path: &NodePath, data: impl Into<RawData>) -> BackendResult<()> {
        let data = data.into();
        let mut tree = self.tree();
        if !tree.nodes.contains_key(path) {
            return Err(BackendError::NoNode {
                path: path.to_string(),
            });
        }
        let zxid = tree.next_zxid();
        if let Some(node) = tree.nodes.get_mut(path) {
            node.stat.version += 1;
            node.stat.mzxid = zxid;
            node.stat.mtime = Utc::now();
            node.stat.data_length = data.len() as i32;
            node.data = data;
        }
        self.fire(&mut tree, CacheKey::data(path.clone()), WatchEventKind::Changed);
        Ok(())
    }

    /// Delete a node together with its whole subtree.
    pub fn delete(&self, path: &NodePath) -> BackendResult<()> {
        let mut tree = self.tree();
        if path.is_root() || !tree.nodes.contains_key(path) {
            return Err(BackendError::NoNode {
                path: path.to_string(),
            });
        }

        let prefix = format!("{}/", path);
        let doomed: Vec<NodePath> = tree
            .nodes
            .keys()
            .filter(|candidate| *candidate == path || candidate.as_str().starts_with(&prefix))
            .cloned()
            .collect();
        for gone in doomed {
            tree.nodes.remove(&gone);
            self.fire(&mut tree, CacheKey::data(gone.clone()), WatchEventKind::Deleted);
            self.fire(&mut tree, CacheKey::children(gone), WatchEventKind::Deleted);
        }

        let zxid = tree.next_zxid();
        if let Some(parent) = path.parent() {
            if let Some(parent_node) = tree.nodes.get_mut(&parent) {
                parent_node.children.retain(|child| child != path.name());
                parent_node.stat.cversion += 1;
                parent_node.stat.pzxid = zxid;
                parent_node.stat.num_children = parent_node.children.len() as i32;
            }
            self.fire(&mut tree, CacheKey::children(parent), WatchEventKind::Changed);
        }
        Ok(())
    }

    pub fn exists(&self, path: &NodePath) -> bool {
        self.tree().nodes.contains_key(path)
    }

    // ------------------------------------------------------------------
    // Failure simulation
    // ------------------------------------------------------------------

    /// Make the ensemble (un)reachable. While unreachable every call,
    /// including `connect`, fails with `ConnectionLoss`.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Expire the current session. Calls fail with `SessionExpired` and armed
    /// watches are dropped until `connect` opens a new session.
    pub fn expire_session(&self) {
        self.session_expired.store(true, Ordering::SeqCst);
        self.tree().armed.clear();
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut current) = self.latency.lock() {
            *current = latency;
        }
    }

    /// Delay reads and watches of `path` alone by `latency`, on top of the
    /// global latency. `Duration::ZERO` clears it.
    pub fn set_path_latency(&self, path: &NodePath, latency: Duration) {
        if let Ok(mut slow) = self.path_latency.lock() {
            if latency.is_zero() {
                slow.remove(path);
            } else {
                slow.insert(path.clone(), latency);
            }
        }
    }

    /// Number of backend calls made so far, failed ones included.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn armed_watch_count(&self) -> usize {
        self.tree().armed.len()
    }

    async fn enter(&self) -> BackendResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = self
            .latency
            .lock()
            .map(|latency| *latency)
            .unwrap_or(Duration::ZERO);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackendError::Closed);
        }
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(BackendError::ConnectionLoss {
                reason: "ensemble unreachable".to_string(),
            });
        }
        Ok(())
    }

    async fn enter_session(&self, path: &NodePath) -> BackendResult<()> {
        self.enter().await?;
        let slow = self
            .path_latency
            .lock()
            .ok()
            .and_then(|slow| slow.get(path).copied());
        if let Some(latency) = slow {
            tokio::time::sleep(latency).await;
        }
        if self.session_expired.load(Ordering::SeqCst) {
            return Err(BackendError::SessionExpired);
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn connect(&self) -> BackendResult<()> {
        self.enter().await?;
        self.session_expired.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn get_node(&self, path: &NodePath) -> BackendResult<(RawData, Stat)> {
        self.enter_session(path).await?;
        let tree = self.tree();
        tree.nodes
            .get(path)
            .map(|node| (node.data.clone(), node.stat.clone()))
            .ok_or_else(|| BackendError::NoNode {
                path: path.to_string(),
            })
    }

    async fn get_children(&self, path: &NodePath) -> BackendResult<(Vec<String>, Stat)> {
        self.enter_session(path).await?;
        let tree = self.tree();
        tree.nodes
            .get(path)
            .map(|node| (node.children.clone(), node.stat.clone()))
            .ok_or_else(|| BackendError::NoNode {
                path: path.to_string(),
            })
    }

    async fn watch(&self, key: &CacheKey) -> BackendResult<()> {
        self.enter_session(&key.path).await?;
        let mut tree = self.tree();
        if !tree.nodes.contains_key(&key.path) {
            return Err(BackendError::NoNode {
                path: key.path.to_string(),
            });
        }
        tree.armed.insert(key.clone());
        Ok(())
    }

    fn watch_events(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.tree().armed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(raw: &str) -> NodePath {
        NodePath::new(raw).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_read() {
        let backend = InMemoryBackend::new();
        backend.create_all(&path("/zk/test/data1"), "Test data 1").unwrap();

        let (data, stat) = backend.get_node(&path("/zk/test/data1")).await.unwrap();
        assert_eq!(data, b"Test data 1".to_vec());
        assert_eq!(stat.version, 0);
        assert_eq!(stat.data_length, 11);

        let (children, stat) = backend.get_children(&path("/zk")).await.unwrap();
        assert_eq!(children, vec!["test".to_string()]);
        assert_eq!(stat.num_children, 1);
    }

    #[tokio::test]
    async fn test_children_keep_creation_order() {
        let backend = InMemoryBackend::new();
        backend.create(&path("/z"), "").unwrap();
        backend.create(&path("/a"), "").unwrap();
        backend.create(&path("/m"), "").unwrap();

        let (children, stat) = backend.get_children(&NodePath::root()).await.unwrap();
        assert_eq!(children, vec!["z", "a", "m"]);
        assert_eq!(stat.cversion, 3);
    }

    #[tokio::test]
    async fn test_set_data_bumps_version_and_mzxid() {
        let backend = InMemoryBackend::new();
        backend.create(&path("/a"), "1").unwrap();
        let (_, before) = backend.get_node(&path("/a")).await.unwrap();
        backend.set_data(&path("/a"), "2").unwrap();
        let (data, after) = backend.get_node(&path("/a")).await.unwrap();

        assert_eq!(data, b"2".to_vec());
        assert_eq!(after.version, before.version + 1);
        assert!(after.mzxid > before.mzxid);
        assert_eq!(after.czxid, before.czxid);
    }

    #[tokio::test]
    async fn test_missing_node_and_parent() {
        let backend = InMemoryBackend::new();
        assert!(matches!(
            backend.get_node(&path("/nope")).await,
            Err(BackendError::NoNode { .. })
        ));
        assert!(matches!(
            backend.create(&path("/a/b"), "x"),
            Err(BackendError::NoNode { path }) if path == "/a"
        ));
    }

    #[tokio::test]
    async fn test_unreachable_and_expired_session() {
        let backend = InMemoryBackend::new();
        backend.create(&path("/a"), "x").unwrap();

        backend.set_reachable(false);
        assert!(matches!(
            backend.get_node(&path("/a")).await,
            Err(BackendError::ConnectionLoss { .. })
        ));
        assert!(backend.connect().await.is_err());
        backend.set_reachable(true);

        backend.expire_session();
        assert_eq!(
            backend.get_node(&path("/a")).await.unwrap_err(),
            BackendError::SessionExpired
        );
        backend.connect().await.unwrap();
        assert!(backend.get_node(&path("/a")).await.is_ok());
        assert_eq!(backend.call_count(), 5);
    }

    #[tokio::test]
    async fn test_watches_are_one_shot() {
        let backend = InMemoryBackend::new();
        backend.create(&path("/a"), "1").unwrap();
        let mut events = backend.watch_events();

        let key = CacheKey::data(path("/a"));
        backend.watch(&key).await.unwrap();
        assert_eq!(backend.armed_watch_count(), 1);

        backend.set_data(&path("/a"), "2").unwrap();
        backend.set_data(&path("/a"), "3").unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event.key, key);
        assert_eq!(event.kind, WatchEventKind::Changed);
        assert!(events.try_recv().is_err());
        assert_eq!(backend.armed_watch_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_fires_deleted_and_parent_children() {
        let backend = InMemoryBackend::new();
        backend.create_all(&path("/p/c"), "x").unwrap();
        let mut events = backend.watch_events();

        backend.watch(&CacheKey::data(path("/p/c"))).await.unwrap();
        backend.watch(&CacheKey::children(path("/p"))).await.unwrap();
        backend.delete(&path("/p/c")).unwrap();

        let first = events.recv().await.unwrap();
        assert_eq!(first.key, CacheKey::data(path("/p/c")));
        assert_eq!(first.kind, WatchEventKind::Deleted);
        let second = events.recv().await.unwrap();
        assert_eq!(second.key, CacheKey::children(path("/p")));
        assert_eq!(second.kind, WatchEventKind::Changed);

        assert!(!backend.exists(&path("/p/c")));
        let (children, _) = backend.get_children(&path("/p")).await.unwrap();
        assert!(children.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_applied() {
        let backend = InMemoryBackend::new();
        backend.set_latency(Duration::from_secs(3));
        let started = tokio::time::Instant::now();
        backend.get_node(&NodePath::root()).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_create_root_overwrites_data() {
        let backend = InMemoryBackend::new();
        backend.create(&NodePath::root(), "r").unwrap();

        let (data, stat) = backend.get_node(&NodePath::root()).await.unwrap();
        assert_eq!(data, b"r".to_vec());
        assert_eq!(stat.version, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_path_latency_only_slows_that_path() {
        let backend = InMemoryBackend::new();
        backend.create(&path("/slow"), "s").unwrap();
        backend.create(&path("/fast"), "f").unwrap();
        backend.set_path_latency(&path("/slow"), Duration::from_secs(3));

        let started = tokio::time::Instant::now();
        backend.get_node(&path("/fast")).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));

        backend.get_node(&path("/slow")).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(3));

        backend.set_path_latency(&path("/slow"), Duration::ZERO);
        let started = tokio::time::Instant::now();
        backend.get_node(&path("/slow")).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_close() {
        let backend = InMemoryBackend::new();
        backend.close().await;
        assert_eq!(backend.connect().await.unwrap_err(), BackendError::Closed);
    }
}
