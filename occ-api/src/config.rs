//! Configuration Loading
//!
//! Builds an [`OccConfig`] from environment variables or a TOML document.
//! Unset settings fall back to the defaults in [`crate::constants`]; the
//! ensemble address list has no default. Both loaders validate before
//! returning.

use std::time::Duration;

use occ_core::{ConfigError, OccConfig, OccResult};
use serde::Deserialize;

use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_MAX_CONCURRENT_REFRESHES, DEFAULT_READ_TIMEOUT_MS,
    DEFAULT_REFRESH_INTERVAL_MS, ENV_CONNECT_TIMEOUT_MS, ENV_ENSEMBLE_ADDRS,
    ENV_MAX_CONCURRENT_REFRESHES, ENV_PRELOAD, ENV_READ_TIMEOUT_MS, ENV_REFRESH_INTERVAL_MS,
};

/// Load configuration from the process environment.
///
/// # Environment Variables
/// - `OCC_ENSEMBLE_ADDRS`: comma-separated `host:port` list (required)
/// - `OCC_CONNECT_TIMEOUT_MS`: session establishment bound (default: 30000)
/// - `OCC_READ_TIMEOUT_MS`: per-read bound (default: 10000)
/// - `OCC_REFRESH_INTERVAL_MS`: refresh pass period (default: 1000)
/// - `OCC_MAX_CONCURRENT_REFRESHES`: refreshes in flight per pass (default: 16)
/// - `OCC_PRELOAD`: connect at startup (default: false)
pub fn from_env() -> OccResult<OccConfig> {
    from_lookup(|name| std::env::var(name).ok())
}

/// Load configuration through an arbitrary variable lookup.
pub fn from_lookup<F>(lookup: F) -> OccResult<OccConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let ensemble_addrs = lookup(ENV_ENSEMBLE_ADDRS)
        .map(|raw| split_addrs(&raw))
        .unwrap_or_default();
    if ensemble_addrs.is_empty() {
        return Err(ConfigError::MissingRequired {
            field: ENV_ENSEMBLE_ADDRS.to_string(),
        }
        .into());
    }

    let millis = |name: &str, default: u64| -> OccResult<Duration> {
        Ok(Duration::from_millis(parse_or(name, lookup(name), default)?))
    };

    let config = OccConfig {
        ensemble_addrs,
        connect_timeout: millis(ENV_CONNECT_TIMEOUT_MS, DEFAULT_CONNECT_TIMEOUT_MS)?,
        read_timeout: millis(ENV_READ_TIMEOUT_MS, DEFAULT_READ_TIMEOUT_MS)?,
        refresh_interval: millis(ENV_REFRESH_INTERVAL_MS, DEFAULT_REFRESH_INTERVAL_MS)?,
        max_concurrent_refreshes: parse_or(
            ENV_MAX_CONCURRENT_REFRESHES,
            lookup(ENV_MAX_CONCURRENT_REFRESHES),
            DEFAULT_MAX_CONCURRENT_REFRESHES,
        )?,
        preload: match lookup(ENV_PRELOAD) {
            Some(raw) => parse_bool(ENV_PRELOAD, &raw)?,
            None => false,
        },
    };
    config.validate()?;
    Ok(config)
}

/// TOML shape: durations are plain millisecond integers.
///
/// ```toml
/// ensemble_addrs = ["zk1:2181", "zk2:2181"]
/// read_timeout_ms = 5000
/// refresh_interval_ms = 2000
/// preload = true
/// ```
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlConfig {
    ensemble_addrs: Vec<String>,
    connect_timeout_ms: Option<u64>,
    read_timeout_ms: Option<u64>,
    refresh_interval_ms: Option<u64>,
    max_concurrent_refreshes: Option<usize>,
    preload: Option<bool>,
}

/// Parse and validate a TOML configuration document.
pub fn from_toml_str(document: &str) -> OccResult<OccConfig> {
    let raw: TomlConfig = toml::from_str(document).map_err(|e| ConfigError::Parse {
        reason: e.to_string(),
    })?;

    let config = OccConfig {
        ensemble_addrs: raw.ensemble_addrs,
        connect_timeout: Duration::from_millis(
            raw.connect_timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
        ),
        read_timeout: Duration::from_millis(raw.read_timeout_ms.unwrap_or(DEFAULT_READ_TIMEOUT_MS)),
        refresh_interval: Duration::from_millis(
            raw.refresh_interval_ms.unwrap_or(DEFAULT_REFRESH_INTERVAL_MS),
        ),
        max_concurrent_refreshes: raw
            .max_concurrent_refreshes
            .unwrap_or(DEFAULT_MAX_CONCURRENT_REFRESHES),
        preload: raw.preload.unwrap_or(false),
    };
    config.validate()?;
    Ok(config)
}

fn split_addrs(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|addr| addr.trim().to_string())
        .filter(|addr| !addr.is_empty())
        .collect()
}

fn parse_or<T>(field: &str, raw: Option<String>, default: T) -> OccResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| {
            ConfigError::InvalidValue {
                field: field.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }
            .into()
        }),
    }
}

fn parse_bool(field: &str, raw: &str) -> OccResult<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: raw.to_string(),
            reason: "expected true or false".to_string(),
        }
        .into()),
    }
}
