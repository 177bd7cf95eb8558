//! OCC Test Utilities
//!
//! Shared test infrastructure for the observer cache workspace:
//! - Proptest generators for paths, payloads and stat metadata
//! - Fixture trees and configurations for common scenarios
//! - Custom assertions for Cached/Stale flags and read errors

// Re-export the in-memory backend from its source crate
pub use occ_storage::InMemoryBackend;

// Re-export core types for convenience
pub use occ_core::{
    BackendError, CacheKey, CacheSlot, CachedValue, ConnectionState, NodePath, OccConfig,
    ReadError, Stat, Timestamp, ZkChildren, ZkNode,
};

/// Build a path that is known to be valid.
///
/// # Panics
/// Panics if `raw` is not a valid node path.
#[track_caller]
pub fn path(raw: &str) -> NodePath {
    match NodePath::new(raw) {
        Ok(path) => path,
        Err(e) => panic!("invalid test path {raw:?}: {e}"),
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for observer cache types.

    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    /// A single path segment.
    pub fn arb_segment() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,11}"
    }

    /// A valid absolute path of one to five segments.
    pub fn arb_node_path() -> impl Strategy<Value = NodePath> {
        prop::collection::vec(arb_segment(), 1..=5)
            .prop_map(|segments| path(&format!("/{}", segments.join("/"))))
    }

    /// Strings that must be rejected as paths.
    pub fn arb_invalid_path() -> impl Strategy<Value = String> {
        prop_oneof![
            Just(String::new()),
            arb_segment(),
            arb_segment().prop_map(|s| format!("/{}/", s)),
            (arb_segment(), arb_segment()).prop_map(|(a, b)| format!("/{}//{}", a, b)),
            arb_segment().prop_map(|s| format!("/{}\0", s)),
        ]
    }

    /// Node payloads, mostly printable.
    pub fn arb_data() -> impl Strategy<Value = Vec<u8>> {
        prop_oneof![
            "[ -~]{0,64}".prop_map(String::into_bytes),
            prop::collection::vec(any::<u8>(), 0..64),
        ]
    }

    /// Generate a timestamp between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1_577_836_800i64..1_893_456_000i64)
            .prop_map(|secs| Utc.timestamp_opt(secs, 0).single().unwrap_or_default())
    }

    pub fn arb_stat() -> impl Strategy<Value = Stat> {
        (
            0i64..1_000_000,
            0i32..1_000,
            0i32..1_000,
            0i32..64,
            arb_timestamp(),
        )
            .prop_map(|(zxid, version, cversion, num_children, mtime)| Stat {
                czxid: zxid,
                mzxid: zxid + i64::from(version),
                ctime: mtime,
                mtime,
                version,
                cversion,
                num_children,
                pzxid: zxid + i64::from(cversion),
                ..Default::default()
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common testing scenarios.

    use super::*;
    use std::time::Duration;

    pub const DATA1: &str = "/zk/test_nj/zkocc1/data1";
    pub const DATA2: &str = "/zk/test_nj/zkocc1/data2";
    pub const DATA3: &str = "/zk/test_nj/zkocc1/data3";
    pub const CELL: &str = "/zk/test_nj";

    /// A backend holding the `test_nj` cell tree:
    ///
    /// ```text
    /// /zk/test_nj/zkocc1/data1 = "Test data 1"
    /// /zk/test_nj/zkocc1/data2 = "Test data 2"
    /// /zk/test_nj/zkocc1/data3 = "Test data 3"
    /// /zk/test_nj/zkocc2
    /// ```
    ///
    /// The cell's child set is churned once before the two cell children are
    /// created, so `/zk/test_nj` reports `CVersion = 4`.
    pub fn zkocc_backend() -> InMemoryBackend {
        let backend = InMemoryBackend::new();
        let seed = || -> Result<(), BackendError> {
            backend.create_all(&path("/zk/test_nj/vt"), Vec::new())?;
            backend.delete(&path("/zk/test_nj/vt"))?;
            backend.create(&path("/zk/test_nj/zkocc1"), Vec::new())?;
            backend.create(&path("/zk/test_nj/zkocc2"), Vec::new())?;
            backend.create(&path(DATA1), "Test data 1")?;
            backend.create(&path(DATA2), "Test data 2")?;
            backend.create(&path(DATA3), "Test data 3")
        };
        if let Err(e) = seed() {
            panic!("failed to seed fixture tree: {e}");
        }
        backend
    }

    /// Short timeouts and a fast refresh interval for tests.
    pub fn fast_config() -> OccConfig {
        OccConfig::new(
            vec!["localhost:3803".to_string()],
            Duration::from_millis(200),
            Duration::from_millis(200),
            Duration::from_millis(50),
        )
        .with_max_concurrent_refreshes(4)
    }

    /// A node value as the store would hold it.
    pub fn node_value(data: &str, version: i32, mzxid: i64) -> CachedValue {
        CachedValue::Node {
            data: data.as_bytes().to_vec(),
            stat: Stat {
                version,
                mzxid,
                data_length: data.len() as i32,
                ..Default::default()
            },
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on read results.

    use super::*;

    /// First observation of a path: served from the backend, not stale.
    #[track_caller]
    pub fn assert_first_observation(node: &ZkNode) {
        assert!(!node.cached, "Expected Cached=false, got {}", node);
        assert!(!node.stale, "Expected Stale=false, got {}", node);
    }

    /// Served from cache and known current.
    #[track_caller]
    pub fn assert_fresh_hit(node: &ZkNode) {
        assert!(node.cached, "Expected Cached=true, got {}", node);
        assert!(!node.stale, "Expected Stale=false, got {}", node);
    }

    /// Served from cache, possibly outdated.
    #[track_caller]
    pub fn assert_stale_hit(node: &ZkNode) {
        assert!(node.cached, "Expected Cached=true, got {}", node);
        assert!(node.stale, "Expected Stale=true, got {}", node);
    }

    #[track_caller]
    pub fn assert_data(node: &ZkNode, expected: &str) {
        assert_eq!(node.data_lossy(), expected, "unexpected data for {}", node.path);
    }

    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &Result<T, ReadError>) {
        match result {
            Err(ReadError::NotFound { .. }) => {}
            other => panic!("Expected NotFound, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_unavailable<T: std::fmt::Debug>(result: &Result<T, ReadError>) {
        match result {
            Err(ReadError::Unavailable { .. }) => {}
            other => panic!("Expected Unavailable, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_timeout<T: std::fmt::Debug>(result: &Result<T, ReadError>) {
        match result {
            Err(ReadError::Timeout { .. }) => {}
            other => panic!("Expected Timeout, got: {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::generators::*;
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_generated_paths_round_trip(p in arb_node_path()) {
            let reparsed = NodePath::new(p.as_str()).unwrap();
            prop_assert_eq!(&reparsed, &p);
            prop_assert!(p.parent().is_some());
        }

        #[test]
        fn prop_invalid_paths_rejected(raw in arb_invalid_path()) {
            prop_assert!(NodePath::new(raw).is_err());
        }
    }

    #[test]
    fn test_fixture_tree_shape() {
        let backend = fixtures::zkocc_backend();
        assert!(backend.exists(&path(fixtures::DATA1)));
        assert!(backend.exists(&path("/zk/test_nj/zkocc2")));
        assert!(!backend.exists(&path("/zk/test_nj/vt")));
    }
}
