//! OCC Storage - Cache Store, Health Monitor and Backend Seam
//!
//! Holds everything that keeps state on behalf of the observer cache: the
//! [`CacheStore`] itself, the [`ConnectionHealthMonitor`] that decides when
//! cached data turns stale, and the [`Backend`] trait the cache reads through.
//! [`InMemoryBackend`] implements the trait for tests and local runs.

pub mod backend;
pub mod cache;
pub mod health;
pub mod memory;

pub use backend::{with_timeout, Backend, WatchEvent, WatchEventKind};
pub use cache::{CacheEntry, CacheRead, CacheStats, CacheStore};
pub use health::{ConnectionHealthMonitor, HealthSnapshot};
pub use memory::InMemoryBackend;
