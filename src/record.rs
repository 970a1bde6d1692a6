//! Identifiers and records shared by the registration and search tables.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// A 256-bit node identifier derived from a node's public key.
pub type NodeId = [u8; 32];

/// A 256-bit, application-chosen identifier that peers rendezvous on.
///
/// Treated as a node identifier for distance purposes: `logdist(topic, id)`
/// uses the same XOR metric as `logdist` between two node IDs.
pub type TopicId = [u8; 32];

/// A signed, versioned record describing how to reach a node.
///
/// Comparable by sequence number: a record with a higher `seq` supersedes an
/// earlier one for the same `id`. Records are immutable once constructed —
/// "upgrading" a stored record means replacing it outright, never mutating it
/// in place. Signature verification happens in the wire codec layer before a
/// `NodeRecord` ever reaches this crate; the core trusts `id`/`seq` as given.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// The node's 256-bit identifier.
    pub id: NodeId,
    /// Monotonically increasing sequence number for this node's record.
    pub seq: u64,
    /// The node's network address.
    #[serde(with = "socket_addr_serde")]
    pub addr: SocketAddr,
}

impl NodeRecord {
    /// Construct a new node record.
    pub fn new(id: NodeId, seq: u64, addr: SocketAddr) -> Self {
        Self { id, seq, addr }
    }

    /// Whether `other` should replace `self` as the stored record for this
    /// node ID: strictly higher sequence numbers win, ties and regressions
    /// are ignored.
    pub fn is_superseded_by(&self, other: &NodeRecord) -> bool {
        debug_assert_eq!(self.id, other.id, "sequence comparison across different node IDs");
        other.seq > self.seq
    }
}

mod socket_addr_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
