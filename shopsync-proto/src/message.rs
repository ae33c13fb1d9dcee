//! The tagged message set shared by all ShopSync flows.
//!
//! Every message is a JSON object with a `type` discriminator. Unknown
//! variants fail decoding, so malformed or foreign traffic is dropped at the
//! frame boundary. `value` payloads are canonical-JSON shopping lists; they
//! stay opaque strings here so the protocol crate does not depend on the
//! CRDT layer.

use serde::{Deserialize, Serialize};
use shopsync_types::{ListId, NodeAddr, QuorumId};

/// A transport-level envelope: the wire message plus its sender.
///
/// The sender address is what replies are routed to; it replaces the
/// identity frame a connection-oriented transport would carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub from: NodeAddr,
    pub message: Message,
}

/// All ShopSync wire messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    // ── Membership and liveness ──────────────────────────────────
    /// Node announces itself to the router.
    Register { address: NodeAddr },
    /// Router's reply: the nodes known *before* this registration.
    RegisterResponse { nodes: Vec<NodeAddr> },
    /// Router broadcast: a node joined the ring.
    AddNode { address: NodeAddr },
    /// Router broadcast: a node left the ring.
    RemoveNode { address: NodeAddr },
    /// Periodic liveness probe.
    Heartbeat,
    HeartbeatResponse { address: NodeAddr },
    /// Immediate availability probe (coordinator election, hint flush).
    HealthCheck,
    HealthCheckResponse { address: NodeAddr },

    // ── Data plane ───────────────────────────────────────────────
    /// Read a key. Client traffic omits `quorum_id`; replica traffic carries
    /// it (the repair sentinel marks responses exempt from accounting).
    Get {
        key: ListId,
        #[serde(default)]
        quorum_id: Option<QuorumId>,
    },
    /// Write a serialized shopping list under a key.
    Put {
        key: ListId,
        value: String,
        #[serde(default)]
        quorum_id: Option<QuorumId>,
    },
    /// Delete a key.
    Delete {
        key: ListId,
        #[serde(default)]
        quorum_id: Option<QuorumId>,
    },
    /// Replica read reply; `value` is `None` when the key was never held.
    GetResponse {
        key: ListId,
        value: Option<String>,
        address: NodeAddr,
        #[serde(default)]
        quorum_id: Option<QuorumId>,
    },
    /// Replica write reply; `value` is the write outcome.
    PutResponse {
        key: ListId,
        value: bool,
        address: NodeAddr,
        #[serde(default)]
        quorum_id: Option<QuorumId>,
    },
    /// Replica delete reply; `value` is `None` when the key was never held.
    DeleteResponse {
        key: ListId,
        value: Option<bool>,
        address: NodeAddr,
        #[serde(default)]
        quorum_id: Option<QuorumId>,
    },

    // ── Coordinator orchestration ────────────────────────────────
    CoordinateGet { key: ListId, quorum_id: QuorumId },
    CoordinatePut {
        key: ListId,
        value: String,
        quorum_id: QuorumId,
    },
    CoordinateDelete { key: ListId, quorum_id: QuorumId },
    /// Merged state if the read quorum was met, `None` otherwise.
    CoordinateGetResponse {
        quorum_id: QuorumId,
        result: Option<String>,
    },
    CoordinatePutResponse { quorum_id: QuorumId, result: bool },
    CoordinateDeleteResponse { quorum_id: QuorumId, result: bool },

    // ── Hinted handoff ───────────────────────────────────────────
    /// Ask a substitute to remember a write for an unreachable `target`.
    WriteHint { key: ListId, target: NodeAddr },
    /// Ask a substitute to remember a delete for an unreachable `target`.
    DeleteHint { key: ListId, target: NodeAddr },
    /// Replay of a hinted write, carrying the substitute's current state.
    PutHandedOff { key: ListId, value: String },
    /// Replay of a hinted delete.
    DeleteHandedOff { key: ListId },
}

impl Message {
    /// The wire discriminator, for logging.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Register { .. } => "REGISTER",
            Self::RegisterResponse { .. } => "REGISTER_RESPONSE",
            Self::AddNode { .. } => "ADD_NODE",
            Self::RemoveNode { .. } => "REMOVE_NODE",
            Self::Heartbeat => "HEARTBEAT",
            Self::HeartbeatResponse { .. } => "HEARTBEAT_RESPONSE",
            Self::HealthCheck => "HEALTH_CHECK",
            Self::HealthCheckResponse { .. } => "HEALTH_CHECK_RESPONSE",
            Self::Get { .. } => "GET",
            Self::Put { .. } => "PUT",
            Self::Delete { .. } => "DELETE",
            Self::GetResponse { .. } => "GET_RESPONSE",
            Self::PutResponse { .. } => "PUT_RESPONSE",
            Self::DeleteResponse { .. } => "DELETE_RESPONSE",
            Self::CoordinateGet { .. } => "COORDINATE_GET",
            Self::CoordinatePut { .. } => "COORDINATE_PUT",
            Self::CoordinateDelete { .. } => "COORDINATE_DELETE",
            Self::CoordinateGetResponse { .. } => "COORDINATE_GET_RESPONSE",
            Self::CoordinatePutResponse { .. } => "COORDINATE_PUT_RESPONSE",
            Self::CoordinateDeleteResponse { .. } => "COORDINATE_DELETE_RESPONSE",
            Self::WriteHint { .. } => "WRITE_HINT",
            Self::DeleteHint { .. } => "DELETE_HINT",
            Self::PutHandedOff { .. } => "PUT_HANDED_OFF",
            Self::DeleteHandedOff { .. } => "DELETE_HANDED_OFF",
        }
    }
}
