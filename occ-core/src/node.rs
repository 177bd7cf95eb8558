//! Node observations: stat metadata, cached values and read results.

use crate::{NodePath, RawData, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Metadata the coordination service attaches to every node.
///
/// `version` and `cversion` never decrease across successive observations of
/// the same node while the session is healthy.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Stat {
    /// Transaction id that created the node.
    pub czxid: i64,
    /// Transaction id of the last data write.
    pub mzxid: i64,
    #[serde(rename = "CTime")]
    pub ctime: Timestamp,
    #[serde(rename = "MTime")]
    pub mtime: Timestamp,
    /// Incremented on every data write.
    pub version: i32,
    /// Incremented on every child-set change.
    #[serde(rename = "CVersion")]
    pub cversion: i32,
    #[serde(rename = "AVersion")]
    pub aversion: i32,
    /// Session id owning an ephemeral node, 0 otherwise.
    pub ephemeral_owner: i64,
    pub data_length: i32,
    pub num_children: i32,
    /// Transaction id of the last child-set change.
    pub pzxid: i64,
}

/// What a cache entry holds for its key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CachedValue {
    Node { data: RawData, stat: Stat },
    Children { children: Vec<String>, stat: Stat },
}

impl CachedValue {
    pub fn stat(&self) -> &Stat {
        match self {
            Self::Node { stat, .. } | Self::Children { stat, .. } => stat,
        }
    }
}

/// Result of a single node read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ZkNode {
    pub path: NodePath,
    pub data: RawData,
    pub stat: Stat,
    /// False only for the first observation of a path, served straight from
    /// the backend.
    pub cached: bool,
    /// The value may predate the last loss of connectivity.
    pub stale: bool,
}

impl ZkNode {
    /// Data rendered as UTF-8, replacing invalid sequences.
    pub fn data_lossy(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

impl fmt::Display for ZkNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} = {} (NumChildren={}, Version={}, Cached={}, Stale={})",
            self.path,
            self.data_lossy(),
            self.stat.num_children,
            self.stat.version,
            self.cached,
            self.stale
        )
    }
}

/// Result of a children listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ZkChildren {
    pub path: NodePath,
    /// Child names in the order the backend returned them.
    pub children: Vec<String>,
    pub stat: Stat,
    pub cached: bool,
    pub stale: bool,
}

impl ZkChildren {
    pub fn num_children(&self) -> i32 {
        self.stat.num_children
    }

    pub fn cversion(&self) -> i32 {
        self.stat.cversion
    }
}

impl fmt::Display for ZkChildren {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Path = {}", self.path)?;
        for (i, child) in self.children.iter().enumerate() {
            writeln!(f, "Child[{}] = {}", i, child)?;
        }
        writeln!(f, "NumChildren = {}", self.stat.num_children)?;
        writeln!(f, "CVersion = {}", self.stat.cversion)?;
        writeln!(f, "Cached = {}", self.cached)?;
        write!(f, "Stale = {}", self.stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(cached: bool, stale: bool) -> ZkNode {
        ZkNode {
            path: NodePath::new("/zk/test_nj/zkocc1/data1").unwrap(),
            data: b"Test data 1".to_vec(),
            stat: Stat {
                data_length: 11,
                ..Default::default()
            },
            cached,
            stale,
        }
    }

    #[test]
    fn test_node_display_matches_client_format() {
        assert_eq!(
            node(false, false).to_string(),
            "/zk/test_nj/zkocc1/data1 = Test data 1 (NumChildren=0, Version=0, Cached=false, Stale=false)"
        );
        assert_eq!(
            node(true, true).to_string(),
            "/zk/test_nj/zkocc1/data1 = Test data 1 (NumChildren=0, Version=0, Cached=true, Stale=true)"
        );
    }

    #[test]
    fn test_children_display_matches_client_format() {
        let children = ZkChildren {
            path: NodePath::new("/zk/test_nj").unwrap(),
            children: vec!["zkocc1".to_string(), "zkocc2".to_string()],
            stat: Stat {
                num_children: 2,
                cversion: 4,
                ..Default::default()
            },
            cached: false,
            stale: false,
        };
        assert_eq!(
            children.to_string(),
            "Path = /zk/test_nj\nChild[0] = zkocc1\nChild[1] = zkocc2\nNumChildren = 2\nCVersion = 4\nCached = false\nStale = false"
        );
        assert_eq!(children.num_children(), 2);
        assert_eq!(children.cversion(), 4);
    }

    #[test]
    fn test_wire_field_names() {
        let json = serde_json::to_value(node(true, false)).unwrap();
        assert_eq!(json["Path"], "/zk/test_nj/zkocc1/data1");
        assert_eq!(json["Cached"], true);
        assert_eq!(json["Stale"], false);
        assert_eq!(json["Stat"]["NumChildren"], 0);
        assert_eq!(json["Stat"]["Version"], 0);
        assert_eq!(json["Stat"]["DataLength"], 11);
        assert!(json["Stat"].get("MTime").is_some());
        assert!(json["Stat"].get("CVersion").is_some());
    }

    #[test]
    fn test_cached_value_stat() {
        let stat = Stat {
            version: 3,
            ..Default::default()
        };
        let value = CachedValue::Node {
            data: vec![1, 2, 3],
            stat: stat.clone(),
        };
        assert_eq!(value.stat(), &stat);
    }
}
