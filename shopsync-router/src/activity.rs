//! Per-node activity tracking.
//!
//! Two signals per node: when it was last heard from at all (liveness
//! eviction), and whether it answered the probe currently in flight
//! (`immediately_available`, used by coordinator election). The flag is
//! cleared when a probe window opens and set by the response.

use shopsync_types::NodeAddr;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct NodeActivity {
    last_seen: Instant,
    immediately_available: bool,
}

/// Activity table for all registered nodes.
#[derive(Debug, Default)]
pub struct ActivityTable {
    entries: HashMap<NodeAddr, NodeActivity>,
}

impl ActivityTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a node.
    pub fn insert(&mut self, node: NodeAddr, now: Instant) {
        self.entries.insert(
            node,
            NodeActivity {
                last_seen: now,
                immediately_available: false,
            },
        );
    }

    /// Stops tracking a node.
    pub fn remove(&mut self, node: &NodeAddr) {
        self.entries.remove(node);
    }

    /// True if the node is tracked.
    #[must_use]
    pub fn contains(&self, node: &NodeAddr) -> bool {
        self.entries.contains_key(node)
    }

    /// Records a response from a node: refreshes liveness and marks it
    /// immediately available.
    pub fn mark_active(&mut self, node: &NodeAddr, now: Instant) {
        if let Some(entry) = self.entries.get_mut(node) {
            entry.last_seen = now;
            entry.immediately_available = true;
        }
    }

    /// Opens a probe window on a node: clears the availability flag so only
    /// a fresh response can set it again.
    pub fn begin_probe(&mut self, node: &NodeAddr) {
        if let Some(entry) = self.entries.get_mut(node) {
            entry.immediately_available = false;
        }
    }

    /// True if the node answered since its last probe window opened.
    #[must_use]
    pub fn is_available(&self, node: &NodeAddr) -> bool {
        self.entries
            .get(node)
            .is_some_and(|e| e.immediately_available)
    }

    /// Nodes not heard from within the threshold.
    #[must_use]
    pub fn stale_nodes(&self, now: Instant, threshold: Duration) -> Vec<NodeAddr> {
        self.entries
            .iter()
            .filter(|(_, e)| now.duration_since(e.last_seen) > threshold)
            .map(|(n, _)| n.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: usize) -> NodeAddr {
        NodeAddr::new(format!("127.0.0.1:{}", 7000 + n))
    }

    #[test]
    fn probe_window_gates_availability() {
        let mut table = ActivityTable::new();
        let now = Instant::now();
        table.insert(addr(1), now);
        assert!(!table.is_available(&addr(1)));

        table.mark_active(&addr(1), now);
        assert!(table.is_available(&addr(1)));

        table.begin_probe(&addr(1));
        assert!(!table.is_available(&addr(1)));
    }

    #[test]
    fn stale_nodes_pass_the_threshold() {
        let mut table = ActivityTable::new();
        let start = Instant::now();
        table.insert(addr(1), start);
        table.insert(addr(2), start);

        let later = start + Duration::from_secs(40);
        table.mark_active(&addr(2), later);

        let stale = table.stale_nodes(later, Duration::from_secs(30));
        assert_eq!(stale, vec![addr(1)]);
    }

    #[test]
    fn responses_from_unknown_nodes_are_ignored() {
        let mut table = ActivityTable::new();
        table.mark_active(&addr(9), Instant::now());
        assert!(!table.contains(&addr(9)));
    }
}
