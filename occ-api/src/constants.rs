//! Constants for the observer cache
//!
//! Defaults applied when a setting is absent from the environment or the TOML
//! document. Centralizing them keeps the loaders and their tests in agreement.

// ============================================================================
// TIMEOUTS AND REFRESH
// ============================================================================

pub use occ_core::config::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_MAX_CONCURRENT_REFRESHES, DEFAULT_READ_TIMEOUT_MS,
    DEFAULT_REFRESH_INTERVAL_MS,
};

// ============================================================================
// TELEMETRY
// ============================================================================

/// Service name reported in logs when `OCC_SERVICE_NAME` is unset
pub const DEFAULT_SERVICE_NAME: &str = "occ";

/// Environment reported in logs when `OCC_ENVIRONMENT` is unset
pub const DEFAULT_ENVIRONMENT: &str = "development";

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "occ_api=debug,occ_storage=debug,info";

// ============================================================================
// ENVIRONMENT VARIABLES
// ============================================================================

pub const ENV_ENSEMBLE_ADDRS: &str = "OCC_ENSEMBLE_ADDRS";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "OCC_CONNECT_TIMEOUT_MS";
pub const ENV_READ_TIMEOUT_MS: &str = "OCC_READ_TIMEOUT_MS";
pub const ENV_REFRESH_INTERVAL_MS: &str = "OCC_REFRESH_INTERVAL_MS";
pub const ENV_MAX_CONCURRENT_REFRESHES: &str = "OCC_MAX_CONCURRENT_REFRESHES";
pub const ENV_PRELOAD: &str = "OCC_PRELOAD";

