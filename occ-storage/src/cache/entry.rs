//! Cache entries and the reads handed out by the store.

use std::sync::Arc;

use occ_core::{CacheKey, CachedValue, ReadError, Timestamp, ZkChildren, ZkNode};

/// Last observed state of one cache key.
///
/// Entries are immutable once published; an update swaps in a new `Arc`, so
/// a reader never sees data from one observation paired with the stat of
/// another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub value: Arc<CachedValue>,
    /// When the value was last confirmed by the backend.
    pub last_refreshed: Timestamp,
    /// Disconnect epoch in which the confirming fetch started.
    pub(crate) fetch_epoch: u64,
}

impl CacheEntry {
    pub fn fetch_epoch(&self) -> u64 {
        self.fetch_epoch
    }

    /// Whether a disconnect happened after this value was fetched.
    pub fn is_stale_at(&self, current_epoch: u64) -> bool {
        self.fetch_epoch < current_epoch
    }
}

/// An entry as seen at one instant, annotated with response flags.
#[derive(Debug, Clone)]
pub struct CacheRead {
    entry: Arc<CacheEntry>,
    cached: bool,
    stale: bool,
}

impl CacheRead {
    /// A value served from an existing entry.
    pub fn from_cache(entry: Arc<CacheEntry>, stale: bool) -> Self {
        Self {
            entry,
            cached: true,
            stale,
        }
    }

    /// A value that was just fetched and stored. `created` marks the first
    /// observation of the key.
    pub fn from_backend(entry: Arc<CacheEntry>, created: bool, stale: bool) -> Self {
        Self {
            entry,
            cached: !created,
            stale,
        }
    }

    pub fn entry(&self) -> &CacheEntry {
        &self.entry
    }

    pub fn is_cached(&self) -> bool {
        self.cached
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Render as a node read; fails if the entry holds a child list.
    pub fn into_node(self) -> Result<ZkNode, ReadError> {
        match self.entry.value.as_ref() {
            CachedValue::Node { data, stat } => Ok(ZkNode {
                path: self.entry.key.path.clone(),
                data: data.clone(),
                stat: stat.clone(),
                cached: self.cached,
                stale: self.stale,
            }),
            CachedValue::Children { .. } => Err(ReadError::InternalCacheInconsistency {
                reason: format!("entry {} holds a child list, not node data", self.entry.key),
            }),
        }
    }

    /// Render as a children read; fails if the entry holds node data.
    pub fn into_children(self) -> Result<ZkChildren, ReadError> {
        match self.entry.value.as_ref() {
            CachedValue::Children { children, stat } => Ok(ZkChildren {
                path: self.entry.key.path.clone(),
                children: children.clone(),
                stat: stat.clone(),
                cached: self.cached,
                stale: self.stale,
            }),
            CachedValue::Node { .. } => Err(ReadError::InternalCacheInconsistency {
                reason: format!("entry {} holds node data, not a child list", self.entry.key),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use occ_core::{NodePath, Stat};

    fn node_entry() -> Arc<CacheEntry> {
        Arc::new(CacheEntry {
            key: CacheKey::data(NodePath::new("/a/b").unwrap()),
            value: Arc::new(CachedValue::Node {
                data: b"X".to_vec(),
                stat: Stat::default(),
            }),
            last_refreshed: Utc::now(),
            fetch_epoch: 1,
        })
    }

    #[test]
    fn test_staleness_by_epoch() {
        let entry = node_entry();
        assert!(!entry.is_stale_at(1));
        assert!(entry.is_stale_at(2));
    }

    #[test]
    fn test_from_backend_first_observation_is_not_cached() {
        let read = CacheRead::from_backend(node_entry(), true, false);
        assert!(!read.is_cached());
        let node = read.into_node().unwrap();
        assert!(!node.cached);
        assert_eq!(node.data, b"X".to_vec());

        let read = CacheRead::from_backend(node_entry(), false, false);
        assert!(read.is_cached());
    }

    #[test]
    fn test_slot_mismatch_is_inconsistency() {
        let read = CacheRead::from_cache(node_entry(), true);
        assert!(read.is_stale());
        let err = read.into_children().unwrap_err();
        assert!(matches!(err, ReadError::InternalCacheInconsistency { .. }));
    }
}
