//! The ring structure and replica resolution walks.

use sha2::{Digest, Sha256};
use shopsync_types::NodeAddr;
use std::collections::HashSet;
use std::fmt;

type RingHash = [u8; 32];

fn hash_key(key: &str) -> RingHash {
    Sha256::digest(key.as_bytes()).into()
}

fn vnode_hash(node: &NodeAddr, index: usize) -> RingHash {
    Sha256::digest(format!("{node}-{index}").as_bytes()).into()
}

/// Health-aware replica resolution for one key.
///
/// `live` and `failed` partition the key's ideal owner set (primary first,
/// in ring order); `substitutes` are the next healthy distinct nodes past
/// the ideal set, one per failed owner, also in ring order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaSet {
    pub live: Vec<NodeAddr>,
    pub failed: Vec<NodeAddr>,
    pub substitutes: Vec<NodeAddr>,
}

/// A consistent-hash ring over node addresses.
#[derive(Debug, Clone)]
pub struct HashRing {
    /// Virtual-node positions, sorted by hash.
    entries: Vec<(RingHash, NodeAddr)>,
    /// Virtual nodes per physical node.
    vnodes: usize,
    /// Total copies per key (primary + N−1 replicas).
    replication: usize,
}

impl HashRing {
    /// Creates an empty ring.
    #[must_use]
    pub fn new(vnodes: usize, replication: usize) -> Self {
        Self {
            entries: Vec::new(),
            vnodes,
            replication,
        }
    }

    /// Creates a ring pre-populated with the given nodes.
    #[must_use]
    pub fn with_nodes(vnodes: usize, replication: usize, nodes: &[NodeAddr]) -> Self {
        let mut ring = Self::new(vnodes, replication);
        for node in nodes {
            ring.add_node(node);
        }
        ring
    }

    /// The configured replication factor N.
    #[must_use]
    pub fn replication(&self) -> usize {
        self.replication
    }

    /// The configured virtual-node multiplier.
    #[must_use]
    pub fn vnodes(&self) -> usize {
        self.vnodes
    }

    /// Number of physical nodes on the ring.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len() / self.vnodes.max(1)
    }

    /// Returns true if no node is on the ring.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if the node is on the ring.
    #[must_use]
    pub fn contains(&self, node: &NodeAddr) -> bool {
        self.entries.iter().any(|(_, n)| n == node)
    }

    /// Distinct physical nodes, in ring order of their first virtual node.
    #[must_use]
    pub fn nodes(&self) -> Vec<NodeAddr> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .filter(|(_, n)| seen.insert(n.clone()))
            .map(|(_, n)| n.clone())
            .collect()
    }

    /// Inserts a node's virtual positions. No-op if already present.
    pub fn add_node(&mut self, node: &NodeAddr) {
        if self.contains(node) {
            return;
        }
        for i in 0..self.vnodes {
            let hash = vnode_hash(node, i);
            let pos = self.entries.partition_point(|(h, _)| h < &hash);
            self.entries.insert(pos, (hash, node.clone()));
        }
    }

    /// Removes a node's virtual positions. No-op if absent.
    pub fn remove_node(&mut self, node: &NodeAddr) {
        self.entries.retain(|(_, n)| n != node);
    }

    /// The node owning the first ring position at or after the key's hash,
    /// wrapping to the start of the ring.
    #[must_use]
    pub fn primary(&self, key: &str) -> Option<&NodeAddr> {
        let pos = self.primary_position(key)?;
        Some(&self.entries[pos].1)
    }

    /// The key's ideal owner set: primary plus the next N−1 distinct nodes
    /// clockwise, ignoring health. A node uses this to decide whether it is
    /// still entitled to hold a key after a membership change.
    #[must_use]
    pub fn ideal_replicas(&self, key: &str) -> Vec<NodeAddr> {
        let Some(start) = self.primary_position(key) else {
            return Vec::new();
        };
        let mut owners = Vec::new();
        for (_, node) in self.walk_from(start) {
            if !owners.contains(node) {
                owners.push(node.clone());
                if owners.len() == self.replication {
                    break;
                }
            }
        }
        owners
    }

    /// The key's N−1 replicas (ideal owners minus the primary).
    #[must_use]
    pub fn replicas(&self, key: &str) -> Vec<NodeAddr> {
        let mut owners = self.ideal_replicas(key);
        if owners.is_empty() {
            return owners;
        }
        owners.remove(0);
        owners
    }

    /// Resolves the key's owner set against known-unhealthy nodes.
    ///
    /// Walks clockwise from the primary position. The first N distinct nodes
    /// are the ideal owners, partitioned into `live` and `failed` by health;
    /// the walk then continues, collecting healthy distinct nodes as
    /// substitutes until there is one per failed owner or the ring is
    /// exhausted. Substitute order is ring order.
    #[must_use]
    pub fn replicas_with_health(
        &self,
        key: &str,
        unhealthy: &HashSet<NodeAddr>,
    ) -> Option<ReplicaSet> {
        let start = self.primary_position(key)?;

        let mut seen = HashSet::new();
        let mut live = Vec::new();
        let mut failed = Vec::new();
        let mut substitutes = Vec::new();

        for (_, node) in self.walk_from(start) {
            if !seen.insert(node.clone()) {
                continue;
            }
            let in_ideal_set = seen.len() <= self.replication;
            if in_ideal_set {
                if unhealthy.contains(node) {
                    failed.push(node.clone());
                } else {
                    live.push(node.clone());
                }
            } else if substitutes.len() < failed.len() {
                if !unhealthy.contains(node) {
                    substitutes.push(node.clone());
                }
            } else {
                break;
            }
        }

        Some(ReplicaSet {
            live,
            failed,
            substitutes,
        })
    }

    fn primary_position(&self, key: &str) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }
        let hash = hash_key(key);
        let pos = self.entries.partition_point(|(h, _)| h < &hash);
        Some(if pos == self.entries.len() { 0 } else { pos })
    }

    /// Iterates every ring slot once, clockwise from `start`.
    fn walk_from(&self, start: usize) -> impl Iterator<Item = &(RingHash, NodeAddr)> {
        self.entries[start..].iter().chain(self.entries[..start].iter())
    }
}

impl fmt::Display for HashRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (hash, node) in &self.entries {
            writeln!(f, "{} {}", hex::encode(&hash[..8]), node)?;
        }
        Ok(())
    }
}
