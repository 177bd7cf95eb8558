//! Read-through cache state.
//!
//! The store only holds what the backend last reported; it never fetches.
//! Fetching, staleness transitions and refresh are driven from outside by the
//! read service, the health monitor and the refresh scheduler.

mod entry;
mod stats;
mod store;

pub use entry::{CacheEntry, CacheRead};
pub use stats::CacheStats;
pub use store::CacheStore;
