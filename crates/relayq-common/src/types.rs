//! Core types shared across RelayQ components.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::constants::PRIMARY_SUFFIX;
use crate::error::QueueError;

/// A queued entry. The key is unique within a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub key: String,
    pub value: String,
}

impl Item {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Serialized form of a whole queue.
///
/// Served by `GET /queue` and consumed by a joining node's bootstrap.
/// Only `list` is authoritative when merging; `keySet` is informational.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    #[serde(default)]
    pub key_set: BTreeSet<String>,
    pub list: Vec<Item>,
}

impl QueueSnapshot {
    /// Decode a snapshot received from a peer
    pub fn from_slice(data: &[u8]) -> Result<Self, QueueError> {
        serde_json::from_slice(data).map_err(|e| QueueError::ParseData(e.to_string()))
    }
}

/// Role of a cluster member, resolved once from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Terminates subscriber connections
    Primary,
    /// Everything else
    Replica,
}

impl NodeRole {
    /// Resolve the role from a node name.
    ///
    /// A name ending in `-1` is primary. A trailing `:port` (as memberlist
    /// style names carry) is ignored.
    pub fn from_name(name: &str) -> Self {
        let base = match name.rsplit_once(':') {
            Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
                host
            }
            _ => name,
        };

        if base.ends_with(PRIMARY_SUFFIX) {
            Self::Primary
        } else {
            Self::Replica
        }
    }

    pub fn is_primary(&self) -> bool {
        matches!(self, Self::Primary)
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::Replica => f.write_str("replica"),
        }
    }
}

/// Liveness of a member as observed through gossip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Alive,
    Suspect,
    Dead,
}

impl NodeState {
    /// Alive and suspect members still count as live
    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Dead)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_from_name() {
        assert_eq!(NodeRole::from_name("relayq-1"), NodeRole::Primary);
        assert_eq!(NodeRole::from_name("relayq-1:8081"), NodeRole::Primary);
        assert_eq!(NodeRole::from_name("relayq-2"), NodeRole::Replica);
        assert_eq!(NodeRole::from_name("relayq-11"), NodeRole::Replica);
        assert_eq!(NodeRole::from_name("relayq-21:8081"), NodeRole::Replica);
        assert_eq!(NodeRole::from_name("primary"), NodeRole::Replica);
    }

    #[test]
    fn test_snapshot_wire_format() {
        let snapshot = QueueSnapshot {
            key_set: ["a".to_string()].into_iter().collect(),
            list: vec![Item::new("a", "1")],
        };

        let json = serde_json::to_string(&snapshot).unwrap();
        assert_eq!(json, r#"{"keySet":["a"],"list":[{"key":"a","value":"1"}]}"#);
    }

    #[test]
    fn test_snapshot_rejects_garbage() {
        let err = QueueSnapshot::from_slice(b"<html>").unwrap_err();
        assert!(matches!(err, QueueError::ParseData(_)));

        let parsed = QueueSnapshot::from_slice(br#"{"list":[]}"#).unwrap();
        assert!(parsed.list.is_empty());
        assert!(parsed.key_set.is_empty());
    }
}
