//! Error types for observer cache operations

use std::time::Duration;
use thiserror::Error;

/// Failures reported by the coordination-store client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("Node does not exist: {path}")]
    NoNode { path: String },

    #[error("Not authorized to read {path}")]
    NoAuth { path: String },

    #[error("Connection to ensemble lost: {reason}")]
    ConnectionLoss { reason: String },

    #[error("Session expired")]
    SessionExpired,

    #[error("Backend call on {path} exceeded {timeout:?}")]
    Timeout { path: String, timeout: Duration },

    #[error("Backend session closed")]
    Closed,
}

impl BackendError {
    /// Whether this failure means the ensemble is unreachable, as opposed to
    /// an authoritative answer about the node itself.
    pub fn is_connectivity_loss(&self) -> bool {
        match self {
            Self::ConnectionLoss { .. }
            | Self::SessionExpired
            | Self::Timeout { .. }
            | Self::Closed => true,
            Self::NoNode { .. } | Self::NoAuth { .. } => false,
        }
    }
}

/// Caller-facing read failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReadError {
    #[error("Node not found: {path}")]
    NotFound { path: String },

    #[error("Node {path} unavailable: {reason}")]
    Unavailable { path: String, reason: String },

    #[error("Read of {path} timed out after {timeout:?}")]
    Timeout { path: String, timeout: Duration },

    #[error("Invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Observer cache is shutting down")]
    ShuttingDown,

    #[error("Internal cache inconsistency: {reason}")]
    InternalCacheInconsistency { reason: String },
}

impl ReadError {
    /// Map a backend failure on `path` into the caller-facing taxonomy.
    pub fn from_backend(path: &str, err: &BackendError) -> Self {
        match err {
            BackendError::NoNode { .. } => Self::NotFound {
                path: path.to_string(),
            },
            BackendError::Timeout { timeout, .. } => Self::Timeout {
                path: path.to_string(),
                timeout: *timeout,
            },
            other => Self::Unavailable {
                path: path.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },
}

impl From<ValidationError> for ReadError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::InvalidPath { path, reason } => Self::InvalidPath { path, reason },
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Master error type for all observer cache errors.
#[derive(Debug, Clone, Error)]
pub enum OccError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Read error: {0}")]
    Read(#[from] ReadError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for observer cache operations.
pub type OccResult<T> = Result<T, OccError>;

/// Result type alias for coordination-store client calls.
pub type BackendResult<T> = Result<T, BackendError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_classification() {
        assert!(BackendError::ConnectionLoss {
            reason: "refused".to_string()
        }
        .is_connectivity_loss());
        assert!(BackendError::SessionExpired.is_connectivity_loss());
        assert!(BackendError::Closed.is_connectivity_loss());
        assert!(BackendError::Timeout {
            path: "/a".to_string(),
            timeout: Duration::from_secs(1),
        }
        .is_connectivity_loss());

        assert!(!BackendError::NoNode {
            path: "/a".to_string()
        }
        .is_connectivity_loss());
        assert!(!BackendError::NoAuth {
            path: "/a".to_string()
        }
        .is_connectivity_loss());
    }

    #[test]
    fn test_read_error_from_backend() {
        let not_found = ReadError::from_backend(
            "/a/b",
            &BackendError::NoNode {
                path: "/a/b".to_string(),
            },
        );
        assert_eq!(
            not_found,
            ReadError::NotFound {
                path: "/a/b".to_string()
            }
        );

        let timeout = ReadError::from_backend(
            "/a/b",
            &BackendError::Timeout {
                path: "/a/b".to_string(),
                timeout: Duration::from_millis(250),
            },
        );
        assert!(matches!(timeout, ReadError::Timeout { timeout, .. } if timeout == Duration::from_millis(250)));

        let unavailable = ReadError::from_backend("/a/b", &BackendError::SessionExpired);
        match unavailable {
            ReadError::Unavailable { path, reason } => {
                assert_eq!(path, "/a/b");
                assert!(reason.contains("Session expired"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_read_error_display() {
        let err = ReadError::Unavailable {
            path: "/zk/test_nj".to_string(),
            reason: "Connection to ensemble lost: refused".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("/zk/test_nj"));
        assert!(msg.contains("unavailable"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "refresh_interval".to_string(),
            value: "0ns".to_string(),
            reason: "must be positive".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("refresh_interval"));
        assert!(msg.contains("0ns"));
        assert!(msg.contains("must be positive"));
    }

    #[test]
    fn test_occ_error_from_variants() {
        let backend = OccError::from(BackendError::SessionExpired);
        assert!(matches!(backend, OccError::Backend(_)));

        let read = OccError::from(ReadError::ShuttingDown);
        assert!(matches!(read, OccError::Read(_)));

        let validation = OccError::from(ValidationError::InvalidPath {
            path: "a".to_string(),
            reason: "must start with /".to_string(),
        });
        assert!(matches!(validation, OccError::Validation(_)));

        let config = OccError::from(ConfigError::MissingRequired {
            field: "ensemble_addrs".to_string(),
        });
        assert!(matches!(config, OccError::Config(_)));
    }
}
