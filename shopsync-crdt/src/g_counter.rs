//! Grow-only counter with a per-replica causal clock.
//!
//! Besides the usual per-replica count map, each counter carries a causal
//! clock: one monotonic tick per replica, bumped on every local increment.
//! Merge compares the two clocks entry-by-entry; a dominant clock wins
//! wholesale, concurrent clocks resolve per-replica by maximum.

use serde::{Deserialize, Serialize};
use shopsync_types::ReplicaId;
use std::collections::BTreeMap;

/// Causality relationship between two replica clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CausalOrder {
    /// First clock happened before second.
    Before,
    /// First clock happened after second.
    After,
    /// Clocks are concurrent (neither happened before the other).
    Concurrent,
    /// Clocks are identical.
    Equal,
}

/// A grow-only counter CRDT.
///
/// Each replica owns one entry in the count map and one tick in the clock.
/// The counter value is the sum of all per-replica counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GCounter {
    counts: BTreeMap<ReplicaId, u64>,
    clock: BTreeMap<ReplicaId, u64>,
}

impl GCounter {
    /// Creates a counter with value 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the counter value (sum of all per-replica counts).
    #[must_use]
    pub fn value(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Returns the count recorded for a replica (0 if never incremented).
    #[must_use]
    pub fn count_for(&self, replica: &ReplicaId) -> u64 {
        self.counts.get(replica).copied().unwrap_or(0)
    }

    /// Returns a new counter with `delta` added under `replica`.
    ///
    /// The replica's causal-clock tick advances by one regardless of `delta`,
    /// so even a zero increment is a visible event.
    #[must_use]
    pub fn increment(&self, replica: &ReplicaId, delta: u64) -> Self {
        let mut next = self.clone();
        *next.counts.entry(replica.clone()).or_insert(0) += delta;
        *next.clock.entry(replica.clone()).or_insert(0) += 1;
        next
    }

    /// Compares the causal clocks of two counters.
    #[must_use]
    pub fn compare(&self, other: &Self) -> CausalOrder {
        compare_clocks(&self.clock, &other.clock)
    }

    /// Returns the merge of this counter and another.
    ///
    /// A dominant clock takes both its clock and its counts wholesale;
    /// concurrent (or equal) clocks resolve per-replica by maximum on both
    /// maps. The value never decreases under merge.
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        match self.compare(other) {
            CausalOrder::Before => other.clone(),
            CausalOrder::After => self.clone(),
            CausalOrder::Equal | CausalOrder::Concurrent => {
                let mut counts = self.counts.clone();
                for (replica, &count) in &other.counts {
                    let entry = counts.entry(replica.clone()).or_insert(0);
                    *entry = (*entry).max(count);
                }
                let mut clock = self.clock.clone();
                for (replica, &tick) in &other.clock {
                    let entry = clock.entry(replica.clone()).or_insert(0);
                    *entry = (*entry).max(tick);
                }
                Self { counts, clock }
            }
        }
    }

    /// Merges another counter into this one.
    pub fn merge(&mut self, other: &Self) {
        *self = self.merged(other);
    }
}

/// Entry-wise comparison of two replica clocks. A missing entry counts as 0.
fn compare_clocks(a: &BTreeMap<ReplicaId, u64>, b: &BTreeMap<ReplicaId, u64>) -> CausalOrder {
    let mut a_dominates = true;
    let mut b_dominates = true;

    for replica in a.keys().chain(b.keys()) {
        let ta = a.get(replica).copied().unwrap_or(0);
        let tb = b.get(replica).copied().unwrap_or(0);
        if ta < tb {
            a_dominates = false;
        }
        if tb < ta {
            b_dominates = false;
        }
    }

    match (a_dominates, b_dominates) {
        (true, true) => CausalOrder::Equal,
        (true, false) => CausalOrder::After,
        (false, true) => CausalOrder::Before,
        (false, false) => CausalOrder::Concurrent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replica(s: &str) -> ReplicaId {
        ReplicaId::new(s).unwrap()
    }

    #[test]
    fn new_counter_is_zero() {
        assert_eq!(GCounter::new().value(), 0);
    }

    #[test]
    fn increment_accumulates() {
        let c = GCounter::new()
            .increment(&replica("a"), 5)
            .increment(&replica("a"), 3);
        assert_eq!(c.value(), 8);
        assert_eq!(c.count_for(&replica("a")), 8);
    }

    #[test]
    fn increments_from_distinct_replicas_sum() {
        let c = GCounter::new()
            .increment(&replica("a"), 3)
            .increment(&replica("b"), 7);
        assert_eq!(c.value(), 10);
    }

    #[test]
    fn sequential_states_are_causally_ordered() {
        let earlier = GCounter::new().increment(&replica("a"), 1);
        let later = earlier.increment(&replica("a"), 1);
        assert_eq!(earlier.compare(&later), CausalOrder::Before);
        assert_eq!(later.compare(&earlier), CausalOrder::After);
    }

    #[test]
    fn forked_states_are_concurrent() {
        let base = GCounter::new().increment(&replica("a"), 1);
        let left = base.increment(&replica("b"), 1);
        let right = base.increment(&replica("c"), 1);
        assert_eq!(left.compare(&right), CausalOrder::Concurrent);
    }

    #[test]
    fn dominant_clock_wins_wholesale() {
        let earlier = GCounter::new().increment(&replica("a"), 2);
        let later = earlier.increment(&replica("a"), 3);
        assert_eq!(earlier.merged(&later), later);
        assert_eq!(later.merged(&earlier), later);
    }

    #[test]
    fn concurrent_merge_takes_per_replica_max() {
        let base = GCounter::new();
        let left = base.increment(&replica("a"), 5);
        let right = base.increment(&replica("b"), 3);
        let merged = left.merged(&right);
        assert_eq!(merged.value(), 8);
        assert_eq!(merged.count_for(&replica("a")), 5);
        assert_eq!(merged.count_for(&replica("b")), 3);
    }

    #[test]
    fn merge_is_commutative() {
        let a = GCounter::new().increment(&replica("a"), 3);
        let b = GCounter::new().increment(&replica("b"), 4);
        assert_eq!(a.merged(&b), b.merged(&a));
    }

    #[test]
    fn merge_is_idempotent() {
        let a = GCounter::new()
            .increment(&replica("a"), 3)
            .increment(&replica("b"), 1);
        assert_eq!(a.merged(&a), a);
    }

    #[test]
    fn value_monotone_under_merge() {
        let a = GCounter::new().increment(&replica("a"), 3);
        let b = GCounter::new().increment(&replica("b"), 9);
        let merged = a.merged(&b);
        assert!(merged.value() >= a.value());
        assert!(merged.value() >= b.value());
    }

    #[test]
    fn zero_increment_still_advances_clock() {
        let a = GCounter::new().increment(&replica("a"), 0);
        assert_eq!(a.value(), 0);
        assert_eq!(GCounter::new().compare(&a), CausalOrder::Before);
    }

    #[test]
    fn serialization_is_canonical() {
        // Same logical state built in different insertion orders encodes to
        // identical bytes (sorted keys).
        let ab = GCounter::new()
            .increment(&replica("a"), 1)
            .increment(&replica("b"), 2);
        let ba = GCounter::new()
            .increment(&replica("b"), 2)
            .increment(&replica("a"), 1);
        assert_eq!(
            serde_json::to_string(&ab).unwrap(),
            serde_json::to_string(&ba).unwrap()
        );
    }

    #[test]
    fn serialization_roundtrip() {
        let c = GCounter::new()
            .increment(&replica("a"), 10)
            .increment(&replica("b"), 5);
        let json = serde_json::to_string(&c).unwrap();
        let parsed: GCounter = serde_json::from_str(&json).unwrap();
        assert_eq!(c, parsed);
    }
}
