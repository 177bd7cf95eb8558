//! Configuration types

use crate::error::{ConfigError, OccResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// DEFAULTS
// ============================================================================

/// Default bound on establishing a session with the ensemble (30 seconds)
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;

/// Default bound on a single node or children read (10 seconds)
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 10_000;

/// Default period of the background refresh pass (1 second)
pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 1_000;

/// Default upper bound on refreshes running at once within one pass
pub const DEFAULT_MAX_CONCURRENT_REFRESHES: usize = 16;

/// Observer cache configuration.
///
/// Every field is required; `occ-api` falls back to the defaults above when
/// loading from the environment or a TOML document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccConfig {
    /// Ensemble member addresses (`host:port`).
    pub ensemble_addrs: Vec<String>,
    /// Bound on establishing or re-establishing a session.
    pub connect_timeout: Duration,
    /// Bound on every node or children read.
    pub read_timeout: Duration,
    /// Period of the background refresh pass.
    pub refresh_interval: Duration,
    /// Upper bound on refreshes running at once within one pass.
    pub max_concurrent_refreshes: usize,
    /// Connect to the ensemble at startup instead of on first read.
    pub preload: bool,
}

impl OccConfig {
    pub fn new(
        ensemble_addrs: Vec<String>,
        connect_timeout: Duration,
        read_timeout: Duration,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            ensemble_addrs,
            connect_timeout,
            read_timeout,
            refresh_interval,
            max_concurrent_refreshes: DEFAULT_MAX_CONCURRENT_REFRESHES,
            preload: false,
        }
    }

    pub fn with_max_concurrent_refreshes(mut self, max: usize) -> Self {
        self.max_concurrent_refreshes = max;
        self
    }

    pub fn with_preload(mut self, preload: bool) -> Self {
        self.preload = preload;
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - at least one ensemble address, none blank
    /// - all durations are positive
    /// - max_concurrent_refreshes > 0
    pub fn validate(&self) -> OccResult<()> {
        if self.ensemble_addrs.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "ensemble_addrs".to_string(),
            }
            .into());
        }

        if let Some(blank) = self.ensemble_addrs.iter().find(|a| a.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "ensemble_addrs".to_string(),
                value: format!("{:?}", blank),
                reason: "ensemble address must not be blank".to_string(),
            }
            .into());
        }

        for (field, value) in [
            ("connect_timeout", self.connect_timeout),
            ("read_timeout", self.read_timeout),
            ("refresh_interval", self.refresh_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: format!("{:?}", value),
                    reason: format!("{} must be positive", field),
                }
                .into());
            }
        }

        if self.max_concurrent_refreshes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_concurrent_refreshes".to_string(),
                value: "0".to_string(),
                reason: "max_concurrent_refreshes must be greater than 0".to_string(),
            }
            .into());
        }

        Ok(())
    }
}
