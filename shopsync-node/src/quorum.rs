//! Quorum accounting for one coordinated request.
//!
//! The tracker is pure bookkeeping so the deadline/retry/dedup rules can be
//! tested without a network: the async driver in `coordinator` feeds it
//! replica replies and asks it what to do next.

use shopsync_crdt::ShoppingList;
use shopsync_types::NodeAddr;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::warn;

/// Which operation the quorum is coordinating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuorumKind {
    Get,
    Put,
    Delete,
}

/// Final result of a quorum round.
#[derive(Debug, Clone, PartialEq)]
pub enum QuorumOutcome {
    /// Write/delete settled with at least the target number of acks.
    Ok,
    /// Read settled; `None` when every responder reported absence.
    Value(Option<String>),
    /// The deadline elapsed short of the target.
    TimedOut,
}

/// Per-peer send bookkeeping.
#[derive(Debug)]
struct PeerTrack {
    last_sent: Instant,
    sends: u32,
}

/// Accounting for one in-flight quorum.
#[derive(Debug)]
pub struct QuorumTracker {
    kind: QuorumKind,
    target: usize,
    deadline: Instant,
    min_retry_interval: Duration,
    peers: HashMap<NodeAddr, PeerTrack>,
    responded: HashSet<NodeAddr>,
    acks: usize,
    /// Non-absent GET payloads, in arrival order.
    values: Vec<String>,
}

/// At most one retry per peer inside a quorum.
const MAX_RETRIES: u32 = 1;

impl QuorumTracker {
    /// Starts tracking a quorum over `peers` (the peers actually written to,
    /// excluding the local node) with the given target count of
    /// acknowledgements. The local apply should be recorded immediately via
    /// [`Self::record_local`].
    #[must_use]
    pub fn new(
        kind: QuorumKind,
        peers: &[NodeAddr],
        target: usize,
        deadline: Instant,
        min_retry_interval: Duration,
        now: Instant,
    ) -> Self {
        Self {
            kind,
            target,
            deadline,
            min_retry_interval,
            peers: peers
                .iter()
                .map(|p| {
                    (
                        p.clone(),
                        PeerTrack {
                            last_sent: now,
                            sends: 1,
                        },
                    )
                })
                .collect(),
            responded: HashSet::new(),
            acks: 0,
            values: Vec::new(),
        }
    }

    /// The operation being coordinated.
    #[must_use]
    pub fn kind(&self) -> QuorumKind {
        self.kind
    }

    /// The deadline for this quorum.
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Acknowledgements received so far.
    #[must_use]
    pub fn received(&self) -> usize {
        self.acks
    }

    /// Records the coordinator's local apply as the first acknowledgement.
    pub fn record_local(&mut self, value: Option<String>) {
        self.acks += 1;
        if let Some(v) = value {
            self.values.push(v);
        }
    }

    /// Records a reply from a peer. The first reply per address counts;
    /// duplicates are discarded. For GETs, `value` carries the replica's
    /// payload (`None` = absent).
    pub fn record_reply(&mut self, from: &NodeAddr, value: Option<String>) {
        if !self.peers.contains_key(from) {
            warn!("quorum reply from {from}, which was never asked");
            return;
        }
        if !self.responded.insert(from.clone()) {
            return;
        }
        self.acks += 1;
        if let Some(v) = value {
            self.values.push(v);
        }
    }

    /// True once the target is met.
    #[must_use]
    pub fn is_met(&self) -> bool {
        self.acks >= self.target
    }

    /// Peers due a retry at `now`: not yet responded, under the retry cap,
    /// and quiet for at least the minimum interval. Never past the deadline.
    #[must_use]
    pub fn due_retries(&mut self, now: Instant) -> Vec<NodeAddr> {
        if self.is_met() || now >= self.deadline {
            return Vec::new();
        }
        let mut due = Vec::new();
        for (peer, track) in &mut self.peers {
            if self.responded.contains(peer) {
                continue;
            }
            if track.sends > MAX_RETRIES {
                continue;
            }
            if now.duration_since(track.last_sent) >= self.min_retry_interval {
                track.last_sent = now;
                track.sends += 1;
                due.push(peer.clone());
            }
        }
        due
    }

    /// Resolves the outcome at or after the deadline, or early once met.
    #[must_use]
    pub fn outcome(&self) -> QuorumOutcome {
        if !self.is_met() {
            return QuorumOutcome::TimedOut;
        }
        match self.kind {
            QuorumKind::Put | QuorumKind::Delete => QuorumOutcome::Ok,
            QuorumKind::Get => QuorumOutcome::Value(self.merged_value()),
        }
    }

    /// Merges every non-absent payload into one canonical encoding.
    /// `None` when all responders reported absence.
    fn merged_value(&self) -> Option<String> {
        let mut merged: Option<ShoppingList> = None;
        for raw in &self.values {
            let list = match ShoppingList::from_json(raw) {
                Ok(list) => list,
                Err(e) => {
                    warn!("discarding undecodable replica payload: {e}");
                    continue;
                }
            };
            match &mut merged {
                Some(acc) => acc.merge(&list),
                None => merged = Some(list),
            }
        }
        merged.and_then(|list| match list.to_json() {
            Ok(json) => Some(json),
            Err(e) => {
                warn!("failed to encode merged read result: {e}");
                None
            }
        })
    }
}
