//! OCC API - Read Service and Lifecycle
//!
//! The caller-facing layer of the observer cache. [`ReadService`] answers
//! `get`, `get_v` and `children` from the cache, falling through to the
//! backend on a miss; the [`jobs::refresh`] task keeps entries current and
//! clears staleness once the ensemble is reachable again. [`ObserverCache`]
//! wires both together.
//!
//! ```ignore
//! use occ_api::{config, ObserverCache};
//!
//! let cache = ObserverCache::start(config::from_env()?, backend).await?;
//! let node = cache.get("/zk/test_nj/zkocc1/data1").await?;
//! println!("{}", node);
//! cache.shutdown().await;
//! ```

pub mod config;
pub mod constants;
pub mod jobs;
pub mod lifecycle;
pub mod service;
pub mod telemetry;

// Re-export commonly used types
pub use jobs::{RefreshConfig, RefreshMetrics, RefreshScheduler, RefreshSnapshot};
pub use lifecycle::ObserverCache;
pub use service::ReadService;
pub use telemetry::{init_tracing, TelemetryConfig};
