//! Background Jobs for the observer cache
//!
//! - `refresh`: keeps cached entries current and clears staleness after an outage
//!
//! # Usage
//!
//! ```ignore
//! use occ_api::jobs::{refresh_task, RefreshScheduler};
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! tokio::spawn(refresh_task(Arc::clone(&scheduler), shutdown_rx));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! ```

pub mod refresh;

pub use refresh::{
    refresh_task, PassSummary, RefreshConfig, RefreshMetrics, RefreshOutcome, RefreshScheduler,
    RefreshSnapshot,
};
