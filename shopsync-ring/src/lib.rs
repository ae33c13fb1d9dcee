//! Consistent-hash ring with virtual nodes.
//!
//! Each physical node owns `vnodes` positions on a SHA-256 ring. A key's
//! primary is the first position clockwise from the key's own hash; the
//! replica set is the next N−1 distinct nodes. Health-aware resolution
//! additionally yields ring-ordered substitutes for unhealthy members, which
//! is what hinted handoff hangs off.

mod ring;

pub use ring::{HashRing, ReplicaSet};
