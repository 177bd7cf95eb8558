//! In-memory cache store keyed by node path and slot.
//!
//! Staleness is tracked with a disconnect epoch rather than a per-entry flag:
//! [`CacheStore::mark_all_stale`] bumps the epoch, and an entry is stale
//! whenever the fetch that produced it started in an earlier epoch. Both the
//! epoch and the entry map sit behind one lock, so a lookup that starts after
//! `mark_all_stale` returns always sees the new epoch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use occ_core::{CacheKey, CacheSlot, CachedValue, ReadError};

use super::entry::{CacheEntry, CacheRead};
use super::stats::CacheStats;

#[derive(Debug, Default)]
struct StoreInner {
    entries: HashMap<CacheKey, Arc<CacheEntry>>,
    epoch: u64,
}

/// Thread-safe map from [`CacheKey`] to its last observed [`CacheEntry`].
///
/// Entries are never evicted; they leave the store only through
/// [`CacheStore::remove`] when the backend reports the node gone.
#[derive(Debug, Default)]
pub struct CacheStore {
    inner: RwLock<StoreInner>,
    hits: AtomicU64,
    misses: AtomicU64,
}

fn poisoned() -> ReadError {
    ReadError::InternalCacheInconsistency {
        reason: "cache store lock poisoned".to_string(),
    }
}

/// Zxid that orders successive observations of the same key.
fn observation_zxid(slot: CacheSlot, value: &CachedValue) -> i64 {
    match slot {
        CacheSlot::Data => value.stat().mzxid,
        CacheSlot::Children => value.stat().pzxid,
    }
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreInner>, ReadError> {
        self.inner.read().map_err(|_| poisoned())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreInner>, ReadError> {
        self.inner.write().map_err(|_| poisoned())
    }

    /// Current disconnect epoch. Capture this before starting a backend
    /// fetch and pass it to [`CacheStore::put_or_update`].
    pub fn current_epoch(&self) -> Result<u64, ReadError> {
        Ok(self.read()?.epoch)
    }

    /// Look up a key. Never touches the backend.
    pub fn lookup(&self, key: &CacheKey) -> Result<Option<CacheRead>, ReadError> {
        let inner = self.read()?;
        match inner.entries.get(key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                let stale = entry.is_stale_at(inner.epoch);
                Ok(Some(CacheRead::from_cache(Arc::clone(entry), stale)))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// Store a freshly fetched value.
    ///
    /// The entry is fresh unless a disconnect happened after `fetch_epoch`.
    /// An observation older than the one already stored (by zxid) does not
    /// replace the stored value, but still counts as a confirmation.
    pub fn put_or_update(
        &self,
        key: CacheKey,
        value: CachedValue,
        fetch_epoch: u64,
    ) -> Result<CacheRead, ReadError> {
        let matches_slot = matches!(
            (key.slot, &value),
            (CacheSlot::Data, CachedValue::Node { .. })
                | (CacheSlot::Children, CachedValue::Children { .. })
        );
        if !matches_slot {
            return Err(ReadError::InternalCacheInconsistency {
                reason: format!("value shape does not match slot of {}", key),
            });
        }

        let mut inner = self.write()?;
        if fetch_epoch > inner.epoch {
            return Err(ReadError::InternalCacheInconsistency {
                reason: format!(
                    "fetch epoch {} for {} is ahead of store epoch {}",
                    fetch_epoch, key, inner.epoch
                ),
            });
        }
        let epoch = inner.epoch;

        let (entry, created) = match inner.entries.get(&key) {
            Some(existing) => {
                let value = if observation_zxid(key.slot, &value)
                    < observation_zxid(key.slot, &existing.value)
                {
                    tracing::debug!(key = %key, "Ignoring out-of-order observation");
                    Arc::clone(&existing.value)
                } else {
                    Arc::new(value)
                };
                let entry = CacheEntry {
                    key: key.clone(),
                    value,
                    last_refreshed: Utc::now(),
                    fetch_epoch: fetch_epoch.max(existing.fetch_epoch),
                };
                (Arc::new(entry), false)
            }
            None => {
                let entry = CacheEntry {
                    key: key.clone(),
                    value: Arc::new(value),
                    last_refreshed: Utc::now(),
                    fetch_epoch,
                };
                (Arc::new(entry), true)
            }
        };

        let stale = entry.is_stale_at(epoch);
        inner.entries.insert(key, Arc::clone(&entry));
        Ok(CacheRead::from_backend(entry, created, stale))
    }

    /// Flag every entry stale by opening a new disconnect epoch.
    /// Returns the new epoch.
    pub fn mark_all_stale(&self) -> Result<u64, ReadError> {
        let mut inner = self.write()?;
        inner.epoch += 1;
        Ok(inner.epoch)
    }

    /// Record that `key` was re-confirmed unchanged by a fetch that started
    /// in `fetch_epoch`. Returns false if the key is not cached.
    pub fn mark_path_fresh(&self, key: &CacheKey, fetch_epoch: u64) -> Result<bool, ReadError> {
        let mut inner = self.write()?;
        let epoch = inner.epoch;
        let Some(existing) = inner.entries.get(key) else {
            return Ok(false);
        };
        let entry = CacheEntry {
            key: existing.key.clone(),
            value: Arc::clone(&existing.value),
            last_refreshed: Utc::now(),
            fetch_epoch: fetch_epoch.min(epoch).max(existing.fetch_epoch),
        };
        inner.entries.insert(key.clone(), Arc::new(entry));
        Ok(true)
    }

    /// The entry for `key`, without counting a hit or miss.
    pub fn peek(&self, key: &CacheKey) -> Result<Option<Arc<CacheEntry>>, ReadError> {
        Ok(self.read()?.entries.get(key).cloned())
    }

    /// Drop an entry after the backend confirmed the node is gone.
    pub fn remove(&self, key: &CacheKey) -> Result<Option<Arc<CacheEntry>>, ReadError> {
        Ok(self.write()?.entries.remove(key))
    }

    /// Snapshot of all entries, for iteration without holding the lock.
    pub fn entries(&self) -> Result<Vec<Arc<CacheEntry>>, ReadError> {
        Ok(self.read()?.entries.values().cloned().collect())
    }

    /// Whether `key` is cached. Unlike [`CacheStore::lookup`], not counted
    /// as a hit or miss.
    pub fn contains(&self, key: &CacheKey) -> Result<bool, ReadError> {
        Ok(self.read()?.entries.contains_key(key))
    }

    pub fn len(&self) -> Result<usize, ReadError> {
        Ok(self.read()?.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool, ReadError> {
        Ok(self.len()? == 0)
    }

    pub fn stats(&self) -> Result<CacheStats, ReadError> {
        let inner = self.read()?;
        let stale_count = inner
            .entries
            .values()
            .filter(|entry| entry.is_stale_at(inner.epoch))
            .count() as u64;
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: inner.entries.len() as u64,
            stale_count,
            epoch: inner.epoch,
        })
    }
}
