//! OCC Core - Observer Cache Types
//!
//! Pure data structures shared by the cache, the health monitor and the read
//! service. This crate contains ONLY data types and validation - no I/O.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod config;
pub mod error;
pub mod health;
pub mod node;

pub use config::OccConfig;
pub use error::{
    BackendError, BackendResult, ConfigError, OccError, OccResult, ReadError, ValidationError,
};
pub use health::{ConnectionState, HealthCheck, HealthStatus};
pub use node::{CachedValue, Stat, ZkChildren, ZkNode};

/// Timestamp type using UTC timezone.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Raw node payload as stored by the coordination service.
pub type RawData = Vec<u8>;

// ============================================================================
// NODE PATHS
// ============================================================================

/// Slash-delimited, validated node path.
///
/// Paths are absolute (`/` prefixed), have no empty segments and no trailing
/// slash, except for the root path `/` itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodePath(String);

impl NodePath {
    /// Validate and wrap a path.
    pub fn new(path: impl Into<String>) -> Result<Self, ValidationError> {
        let path = path.into();
        validate_path(&path)?;
        Ok(Self(path))
    }

    /// The root path `/`.
    pub fn root() -> Self {
        Self("/".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Parent path, or `None` for the root.
    pub fn parent(&self) -> Option<NodePath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Last path segment (empty for the root).
    pub fn name(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    /// Append a single child segment.
    pub fn join(&self, child: &str) -> Result<NodePath, ValidationError> {
        if child.is_empty() || child.contains('/') {
            return Err(ValidationError::InvalidPath {
                path: child.to_string(),
                reason: "child name must be a single non-empty segment".to_string(),
            });
        }
        if self.is_root() {
            Self::new(format!("/{}", child))
        } else {
            Self::new(format!("{}/{}", self.0, child))
        }
    }
}

fn validate_path(path: &str) -> Result<(), ValidationError> {
    let invalid = |reason: &str| {
        Err(ValidationError::InvalidPath {
            path: path.to_string(),
            reason: reason.to_string(),
        })
    };

    if !path.starts_with('/') {
        return invalid("path must start with /");
    }
    if path == "/" {
        return Ok(());
    }
    if path.ends_with('/') {
        return invalid("path must not end with /");
    }
    if path.contains('\0') {
        return invalid("path must not contain NUL");
    }
    if path[1..].split('/').any(|segment| segment.is_empty()) {
        return invalid("path must not contain empty segments");
    }
    Ok(())
}

impl TryFrom<String> for NodePath {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NodePath> for String {
    fn from(path: NodePath) -> Self {
        path.0
    }
}

impl AsRef<str> for NodePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// CACHE KEYS
// ============================================================================

/// Which observation of a node a cache entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CacheSlot {
    /// The node's own data and stat.
    Data,
    /// The node's child list.
    Children,
}

/// Key into the cache store: one path may hold both a data and a children entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub path: NodePath,
    pub slot: CacheSlot,
}

impl CacheKey {
    pub fn data(path: NodePath) -> Self {
        Self {
            path,
            slot: CacheSlot::Data,
        }
    }

    pub fn children(path: NodePath) -> Self {
        Self {
            path,
            slot: CacheSlot::Children,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slot {
            CacheSlot::Data => write!(f, "{}", self.path),
            CacheSlot::Children => write!(f, "{} [children]", self.path),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_paths() {
        for p in ["/", "/zk", "/zk/test_nj/zkocc1/data1", "/a-b.c/d_e"] {
            assert!(NodePath::new(p).is_ok(), "{p} should be valid");
        }
    }

    #[test]
    fn test_invalid_paths() {
        for p in ["", "zk", "/zk/", "//", "/a//b", "/a/\0b"] {
            assert!(NodePath::new(p).is_err(), "{p:?} should be invalid");
        }
    }

    #[test]
    fn test_parent_and_name() {
        let path = NodePath::new("/zk/test_nj/zkocc1").unwrap();
        assert_eq!(path.name(), "zkocc1");
        assert_eq!(path.parent().unwrap().as_str(), "/zk/test_nj");

        let top = NodePath::new("/zk").unwrap();
        assert_eq!(top.parent().unwrap(), NodePath::root());
        assert!(NodePath::root().parent().is_none());
        assert_eq!(NodePath::root().name(), "");
    }

    #[test]
    fn test_join() {
        let root = NodePath::root();
        assert_eq!(root.join("zk").unwrap().as_str(), "/zk");

        let zk = NodePath::new("/zk").unwrap();
        assert_eq!(zk.join("test_nj").unwrap().as_str(), "/zk/test_nj");
        assert!(zk.join("a/b").is_err());
        assert!(zk.join("").is_err());
    }

    #[test]
    fn test_node_path_serde() {
        let path = NodePath::new("/zk/test_nj").unwrap();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"/zk/test_nj\"");

        let back: NodePath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);

        let bad: Result<NodePath, _> = serde_json::from_str("\"no-slash\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_cache_key_slots_are_distinct() {
        let path = NodePath::new("/zk/test_nj").unwrap();
        let data = CacheKey::data(path.clone());
        let children = CacheKey::children(path);
        assert_ne!(data, children);
        assert_eq!(children.to_string(), "/zk/test_nj [children]");
    }
}
