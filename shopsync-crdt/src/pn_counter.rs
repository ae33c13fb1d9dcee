//! Positive-negative counter built from two G-Counters.

use crate::g_counter::GCounter;
use serde::{Deserialize, Serialize};
use shopsync_types::ReplicaId;

/// A positive-negative counter CRDT.
///
/// Increments and decrements accumulate in two independent [`GCounter`]s.
/// The value is `max(increments − decrements, 0)`; the floor at zero is a
/// display convenience and does not alter the internal state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PNCounter {
    inc: GCounter,
    dec: GCounter,
}

impl PNCounter {
    /// Creates a counter with value 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the counter value, floored at zero.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.inc.value().saturating_sub(self.dec.value())
    }

    /// Returns a new counter with `delta` added under `replica`.
    #[must_use]
    pub fn increment(&self, replica: &ReplicaId, delta: u64) -> Self {
        Self {
            inc: self.inc.increment(replica, delta),
            dec: self.dec.clone(),
        }
    }

    /// Returns a new counter with `delta` subtracted under `replica`.
    #[must_use]
    pub fn decrement(&self, replica: &ReplicaId, delta: u64) -> Self {
        Self {
            inc: self.inc.clone(),
            dec: self.dec.increment(replica, delta),
        }
    }

    /// Returns the merge of this counter and another (each side merged
    /// independently).
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        Self {
            inc: self.inc.merged(&other.inc),
            dec: self.dec.merged(&other.dec),
        }
    }

    /// Merges another counter into this one.
    pub fn merge(&mut self, other: &Self) {
        *self = self.merged(other);
    }
}
