//! Cache usage statistics.

use serde_json::json;

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of lookups answered from the store.
    pub hits: u64,
    /// Number of lookups that found nothing.
    pub misses: u64,
    /// Number of entries currently in the store.
    pub entry_count: u64,
    /// Entries whose value predates the last disconnect.
    pub stale_count: u64,
    /// Current disconnect epoch.
    pub epoch: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "hits": self.hits,
            "misses": self.misses,
            "entry_count": self.entry_count,
            "stale_count": self.stale_count,
            "epoch": self.epoch,
            "hit_rate": self.hit_rate(),
        })
    }
}
