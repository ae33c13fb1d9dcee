//! In-memory node state: held lists, dirty tracking, hints, peer health.

use shopsync_crdt::ShoppingList;
use shopsync_ring::HashRing;
use shopsync_types::{ListId, NodeAddr};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Instant;

/// Everything a node knows, apart from the in-flight quorum table.
///
/// A key may hold several concurrent versions between receipt and the next
/// read; reads collapse them to the single merged state.
pub struct NodeState {
    addr: NodeAddr,
    ring: HashRing,
    data: HashMap<ListId, Vec<ShoppingList>>,
    dirty: HashSet<ListId>,
    write_hints: HashMap<NodeAddr, BTreeSet<ListId>>,
    delete_hints: HashMap<NodeAddr, BTreeSet<ListId>>,
    peer_seen: HashMap<NodeAddr, Instant>,
    suspects: HashSet<NodeAddr>,
}

impl NodeState {
    /// Creates empty state for a node at `addr` with an empty ring.
    #[must_use]
    pub fn new(addr: NodeAddr, vnodes: usize, replication: usize) -> Self {
        let mut ring = HashRing::new(vnodes, replication);
        ring.add_node(&addr);
        Self {
            addr,
            ring,
            data: HashMap::new(),
            dirty: HashSet::new(),
            write_hints: HashMap::new(),
            delete_hints: HashMap::new(),
            peer_seen: HashMap::new(),
            suspects: HashSet::new(),
        }
    }

    /// This node's address.
    #[must_use]
    pub fn addr(&self) -> &NodeAddr {
        &self.addr
    }

    /// The node's ring copy (authoritative copy lives on the router).
    #[must_use]
    pub fn ring(&self) -> &HashRing {
        &self.ring
    }

    /// Rebuilds the ring from a full node list (REGISTER_RESPONSE).
    pub fn rebuild_ring(&mut self, nodes: &[NodeAddr]) {
        let mut ring = HashRing::new(self.ring.vnodes(), self.ring.replication());
        ring.add_node(&self.addr);
        for node in nodes {
            ring.add_node(node);
        }
        self.ring = ring;
    }

    /// Applies an ADD_NODE notification.
    pub fn add_ring_node(&mut self, node: &NodeAddr) {
        self.ring.add_node(node);
    }

    /// Applies a REMOVE_NODE notification.
    pub fn remove_ring_node(&mut self, node: &NodeAddr) {
        self.ring.remove_node(node);
        self.write_hints.remove(node);
        self.delete_hints.remove(node);
        self.suspects.remove(node);
        self.peer_seen.remove(node);
    }

    // ── List data ────────────────────────────────────────────────

    /// Stores one version of a list under a key and marks the key dirty.
    pub fn write(&mut self, key: ListId, list: ShoppingList) {
        self.data.entry(key).or_default().push(list);
        self.dirty.insert(key);
    }

    /// Inserts recovered state without marking it dirty (startup load).
    pub fn load(&mut self, list: ShoppingList) {
        self.data.entry(list.id()).or_default().push(list);
    }

    /// Merges all held versions of a key into one, collapses the history,
    /// and returns the merged state. `None` if the key was never held.
    pub fn read(&mut self, key: &ListId) -> Option<ShoppingList> {
        let versions = self.data.get_mut(key)?;
        let mut merged = versions.first()?.clone();
        for version in versions.iter().skip(1) {
            merged.merge(version);
        }
        *versions = vec![merged.clone()];
        Some(merged)
    }

    /// Removes a key. Returns true if it was held.
    pub fn delete(&mut self, key: &ListId) -> bool {
        self.dirty.remove(key);
        self.data.remove(key).is_some()
    }

    /// Returns true if the key is held.
    #[must_use]
    pub fn holds(&self, key: &ListId) -> bool {
        self.data.contains_key(key)
    }

    /// All held keys.
    #[must_use]
    pub fn keys(&self) -> Vec<ListId> {
        self.data.keys().copied().collect()
    }

    /// Clears a key's dirty flag, reporting whether it was set.
    pub fn take_dirty(&mut self, key: &ListId) -> bool {
        self.dirty.remove(key)
    }

    /// Collapses and returns every held list (shutdown flush).
    pub fn collapse_all(&mut self) -> Vec<ShoppingList> {
        let keys = self.keys();
        keys.iter().filter_map(|k| self.read(k)).collect()
    }

    /// True if this node is in the key's ideal owner set.
    #[must_use]
    pub fn entitled(&self, key: &ListId) -> bool {
        self.ring.ideal_replicas(&key.to_string()).contains(&self.addr)
    }

    // ── Hints ────────────────────────────────────────────────────

    /// Remembers that `target` missed a write of `key`.
    pub fn record_write_hint(&mut self, target: NodeAddr, key: ListId) {
        self.write_hints.entry(target).or_default().insert(key);
    }

    /// Remembers that `target` missed a delete of `key`.
    pub fn record_delete_hint(&mut self, target: NodeAddr, key: ListId) {
        self.delete_hints.entry(target).or_default().insert(key);
    }

    /// Peers with at least one pending hint.
    #[must_use]
    pub fn hinted_peers(&self) -> Vec<NodeAddr> {
        let mut peers: BTreeSet<NodeAddr> = self.write_hints.keys().cloned().collect();
        peers.extend(self.delete_hints.keys().cloned());
        peers.into_iter().collect()
    }

    /// Removes and returns the pending (writes, deletes) hints for a peer.
    /// Call only after a healthy probe of the peer.
    pub fn take_hints(&mut self, peer: &NodeAddr) -> (Vec<ListId>, Vec<ListId>) {
        let writes = self
            .write_hints
            .remove(peer)
            .map(|s| s.into_iter().collect())
            .unwrap_or_default();
        let deletes = self
            .delete_hints
            .remove(peer)
            .map(|s| s.into_iter().collect())
            .unwrap_or_default();
        (writes, deletes)
    }

    /// Pending hint counts for a peer (writes, deletes).
    #[must_use]
    pub fn pending_hints(&self, peer: &NodeAddr) -> (usize, usize) {
        (
            self.write_hints.get(peer).map_or(0, BTreeSet::len),
            self.delete_hints.get(peer).map_or(0, BTreeSet::len),
        )
    }

    // ── Peer health ──────────────────────────────────────────────

    /// Records evidence that a peer is alive (any message from it).
    pub fn mark_seen(&mut self, peer: &NodeAddr, now: Instant) {
        self.peer_seen.insert(peer.clone(), now);
        self.suspects.remove(peer);
    }

    /// Records a failed send to a peer.
    pub fn mark_suspect(&mut self, peer: &NodeAddr) {
        if *peer != self.addr {
            self.suspects.insert(peer.clone());
        }
    }

    /// Peers currently considered unreachable.
    #[must_use]
    pub fn suspects(&self) -> HashSet<NodeAddr> {
        self.suspects.clone()
    }

    /// When the peer was last seen, if ever.
    #[must_use]
    pub fn last_seen(&self, peer: &NodeAddr) -> Option<Instant> {
        self.peer_seen.get(peer).copied()
    }
}
