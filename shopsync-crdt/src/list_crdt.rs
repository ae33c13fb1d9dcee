//! The shopping-list CRDT: a map from item name to PN-Counter.

use crate::pn_counter::PNCounter;
use serde::{Deserialize, Serialize};
use shopsync_types::ReplicaId;
use std::collections::BTreeMap;

/// Map from item name to quantity counter.
///
/// A missing key is equivalent to a zero counter. Deleting an item decrements
/// its counter by the current value (soft delete), so the key stays in the
/// map; a concurrent increment from another replica survives the delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShoppingListCrdt {
    counters: BTreeMap<String, PNCounter>,
}

impl ShoppingListCrdt {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the quantity of an item (0 if absent).
    #[must_use]
    pub fn value(&self, item: &str) -> u64 {
        self.counters.get(item).map_or(0, PNCounter::value)
    }

    /// Returns true if the item has ever been touched on this replica's copy.
    #[must_use]
    pub fn contains(&self, item: &str) -> bool {
        self.counters.contains_key(item)
    }

    /// Iterates over `(item, quantity)` pairs, including soft-deleted items
    /// at quantity 0.
    pub fn items(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counters.iter().map(|(k, v)| (k.as_str(), v.value()))
    }

    /// Number of item keys held (soft-deleted keys included).
    #[must_use]
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Returns true if no item has ever been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Returns a new map with `delta` added to `item` under `replica`.
    #[must_use]
    pub fn increment(&self, item: &str, replica: &ReplicaId, delta: u64) -> Self {
        self.update(item, |c| c.increment(replica, delta))
    }

    /// Returns a new map with `delta` subtracted from `item` under `replica`.
    #[must_use]
    pub fn decrement(&self, item: &str, replica: &ReplicaId, delta: u64) -> Self {
        self.update(item, |c| c.decrement(replica, delta))
    }

    /// Returns a new map with `item` soft-deleted: its counter is decremented
    /// by its current value under `replica`. The key remains in the map.
    #[must_use]
    pub fn remove(&self, item: &str, replica: &ReplicaId) -> Self {
        let current = self.value(item);
        self.update(item, |c| c.decrement(replica, current))
    }

    /// Returns the merge of this map and another: per-key counter merge over
    /// the union of keys.
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        let mut counters = self.counters.clone();
        for (item, counter) in &other.counters {
            match counters.get_mut(item) {
                Some(existing) => existing.merge(counter),
                None => {
                    counters.insert(item.clone(), counter.clone());
                }
            }
        }
        Self { counters }
    }

    /// Merges another map into this one.
    pub fn merge(&mut self, other: &Self) {
        *self = self.merged(other);
    }

    fn update(&self, item: &str, f: impl FnOnce(&PNCounter) -> PNCounter) -> Self {
        let mut counters = self.counters.clone();
        let counter = counters.entry(item.to_string()).or_default();
        *counter = f(counter);
        Self { counters }
    }
}
