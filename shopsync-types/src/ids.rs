//! Identifier types used throughout the ShopSync core.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a shopping list. Doubles as the partition key on the
/// consistent-hash ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListId(Uuid);

impl ListId {
    /// Creates a fresh list ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a list ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Parses a list ID from a string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for ListId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ListId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Opaque replica identity under which CRDT updates are recorded.
///
/// Produced by the client (typically its username or device id); the server
/// side only hashes and compares it. Must be non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicaId(String);

impl ReplicaId {
    /// Creates a replica ID, refusing the empty string.
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(crate::Error::EmptyReplicaId);
        }
        Ok(Self(id))
    }

    /// Returns the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ReplicaId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Network address of a storage node or router, in `host:port` form.
///
/// Addresses are compared verbatim; they are also the input to the ring's
/// virtual-node hashing, so two spellings of the same endpoint are two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeAddr(String);

impl NodeAddr {
    /// Creates a node address.
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeAddr {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeAddr {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Correlation id for one quorum round.
///
/// The wire form is a UUID string; the empty string marks a read-repair
/// exchange, which is exempt from quorum accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuorumId {
    /// Read-repair sentinel — the response is merged locally, never counted.
    Repair,
    /// A regular quorum round.
    Id(Uuid),
}

impl QuorumId {
    /// Creates a fresh quorum id.
    #[must_use]
    pub fn new() -> Self {
        Self::Id(Uuid::new_v4())
    }

    /// Returns true for the read-repair sentinel.
    #[must_use]
    pub fn is_repair(&self) -> bool {
        matches!(self, Self::Repair)
    }
}

impl Default for QuorumId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QuorumId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Repair => Ok(()),
            Self::Id(uuid) => write!(f, "{uuid}"),
        }
    }
}

impl Serialize for QuorumId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Repair => serializer.serialize_str(""),
            Self::Id(uuid) => serializer.serialize_str(&uuid.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for QuorumId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() {
            return Ok(Self::Repair);
        }
        Uuid::parse_str(&s)
            .map(Self::Id)
            .map_err(serde::de::Error::custom)
    }
}
