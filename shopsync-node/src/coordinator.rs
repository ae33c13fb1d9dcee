//! Quorum drivers: one task per coordinated request.
//!
//! The router hands a node a COORDINATE_* request; the node resolves the
//! key's replica set against its own ring copy, fans the operation out,
//! counts acknowledgements with [`QuorumTracker`], and reports the outcome
//! back to the router. Hints for peers that were already known-unreachable
//! are lodged with substitutes before the fan-out.

use crate::config::NodeConfig;
use crate::quorum::{QuorumKind, QuorumOutcome, QuorumTracker};
use crate::state::NodeState;
use shopsync_crdt::ShoppingList;
use shopsync_proto::{Message, Transport};
use shopsync_storage::ListStore;
use shopsync_types::{ListId, NodeAddr, QuorumId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

/// How often a driver wakes to consider retries.
const RETRY_POLL: Duration = Duration::from_millis(100);

/// A replica's answer, routed from the receive loop to a driver.
#[derive(Debug)]
pub(crate) struct ReplicaReply {
    pub from: NodeAddr,
    pub body: ReplyBody,
}

#[derive(Debug)]
pub(crate) enum ReplyBody {
    Get(Option<String>),
    Put(bool),
    Delete(Option<bool>),
}

/// Shared handles every node task works against.
#[derive(Clone)]
pub(crate) struct NodeCtx {
    pub transport: Arc<dyn Transport>,
    pub state: Arc<RwLock<NodeState>>,
    pub store: Arc<ListStore>,
    pub config: NodeConfig,
    pub quorums: Arc<Mutex<HashMap<Uuid, mpsc::UnboundedSender<ReplicaReply>>>>,
}

/// One dequeued COORDINATE_* request.
#[derive(Debug)]
pub(crate) struct CoordinateTask {
    pub kind: QuorumKind,
    pub key: ListId,
    pub value: Option<String>,
    pub quorum_id: Uuid,
    pub reply_to: NodeAddr,
}

/// Drives one quorum to completion and reports to the router.
pub(crate) async fn run_quorum(ctx: NodeCtx, task: CoordinateTask, mut rx: mpsc::UnboundedReceiver<ReplicaReply>) {
    let outcome = execute(&ctx, &task, &mut rx).await;
    ctx.quorums.lock().await.remove(&task.quorum_id);

    let quorum_id = QuorumId::Id(task.quorum_id);
    let response = match (task.kind, outcome) {
        (QuorumKind::Put, QuorumOutcome::Ok) => Message::CoordinatePutResponse {
            quorum_id,
            result: true,
        },
        (QuorumKind::Put, _) => Message::CoordinatePutResponse {
            quorum_id,
            result: false,
        },
        (QuorumKind::Delete, QuorumOutcome::Ok) => Message::CoordinateDeleteResponse {
            quorum_id,
            result: true,
        },
        (QuorumKind::Delete, _) => Message::CoordinateDeleteResponse {
            quorum_id,
            result: false,
        },
        (QuorumKind::Get, QuorumOutcome::Value(result)) => {
            Message::CoordinateGetResponse { quorum_id, result }
        }
        (QuorumKind::Get, _) => Message::CoordinateGetResponse {
            quorum_id,
            result: None,
        },
    };

    if let Err(e) = ctx.transport.send(&task.reply_to, response).await {
        warn!("failed to report quorum {} to router: {e}", task.quorum_id);
    }
}

async fn execute(
    ctx: &NodeCtx,
    task: &CoordinateTask,
    rx: &mut mpsc::UnboundedReceiver<ReplicaReply>,
) -> QuorumOutcome {
    // A PUT payload that does not decode is refused outright.
    let parsed = match (&task.kind, &task.value) {
        (QuorumKind::Put, Some(raw)) => match ShoppingList::from_json(raw) {
            Ok(list) => Some(list),
            Err(e) => {
                warn!("refusing undecodable PUT for {}: {e}", task.key);
                return QuorumOutcome::TimedOut;
            }
        },
        (QuorumKind::Put, None) => {
            warn!("PUT for {} carried no payload", task.key);
            return QuorumOutcome::TimedOut;
        }
        _ => None,
    };

    // Resolve live/failed/substitute sets from this node's ring copy.
    let (self_addr, live, failed, substitutes) = {
        let state = ctx.state.read().await;
        let suspects = state.suspects();
        match state
            .ring()
            .replicas_with_health(&task.key.to_string(), &suspects)
        {
            Some(set) => (state.addr().clone(), set.live, set.failed, set.substitutes),
            None => return QuorumOutcome::TimedOut,
        }
    };

    // Hints for peers already known unreachable, one distinct substitute
    // each, in ring order. Reads take no hints.
    if task.kind != QuorumKind::Get {
        for (failed_peer, substitute) in failed.iter().zip(&substitutes) {
            let hint = match task.kind {
                QuorumKind::Put => Message::WriteHint {
                    key: task.key,
                    target: failed_peer.clone(),
                },
                QuorumKind::Delete => Message::DeleteHint {
                    key: task.key,
                    target: failed_peer.clone(),
                },
                QuorumKind::Get => unreachable!(),
            };
            if let Err(e) = ctx.transport.send(substitute, hint).await {
                warn!("failed to lodge hint with {substitute}: {e}");
                ctx.state.write().await.mark_suspect(substitute);
            }
        }
    }

    // Local apply counts as the first acknowledgement.
    let local_value = apply_locally(ctx, task, parsed).await;

    // Writes and deletes also go to the substitutes (sloppy quorum); reads
    // only to the surviving ideal owners.
    let mut targets: Vec<NodeAddr> = live.iter().filter(|n| **n != self_addr).cloned().collect();
    if task.kind != QuorumKind::Get {
        targets.extend(substitutes.iter().cloned());
    }

    let target_count = match task.kind {
        QuorumKind::Put => ctx.config.write_quorum.min(live.len().max(1)),
        QuorumKind::Delete => ctx.config.read_quorum.min(live.len().max(1)),
        QuorumKind::Get => ctx.config.read_quorum,
    };

    let now = Instant::now();
    let deadline = now + ctx.config.quorum_timeout;
    let mut tracker = QuorumTracker::new(
        task.kind,
        &targets,
        target_count,
        deadline,
        ctx.config.min_retry_interval,
        now,
    );
    tracker.record_local(local_value);

    for peer in &targets {
        send_replica_request(ctx, task, peer).await;
    }

    debug!(
        quorum = %task.quorum_id,
        kind = ?task.kind,
        peers = targets.len(),
        target = target_count,
        "quorum started"
    );

    while !tracker.is_met() {
        let now = Instant::now();
        if now >= tracker.deadline() {
            break;
        }
        let tick = RETRY_POLL.min(tracker.deadline() - now);
        tokio::select! {
            reply = rx.recv() => {
                let Some(reply) = reply else { break };
                apply_reply(&mut tracker, reply);
            }
            _ = tokio::time::sleep(tick) => {
                for peer in tracker.due_retries(Instant::now()) {
                    debug!(quorum = %task.quorum_id, %peer, "retrying quorum peer");
                    send_replica_request(ctx, task, &peer).await;
                }
            }
        }
    }

    tracker.outcome()
}

fn apply_reply(tracker: &mut QuorumTracker, reply: ReplicaReply) {
    match (tracker.kind(), reply.body) {
        (QuorumKind::Get, ReplyBody::Get(value)) => tracker.record_reply(&reply.from, value),
        // A refused write is not an acknowledgement.
        (QuorumKind::Put, ReplyBody::Put(true)) => tracker.record_reply(&reply.from, None),
        (QuorumKind::Put, ReplyBody::Put(false)) => {
            warn!("peer {} refused the write", reply.from);
        }
        // Any delete response settles that replica, present or absent.
        (QuorumKind::Delete, ReplyBody::Delete(_)) => tracker.record_reply(&reply.from, None),
        (kind, body) => {
            debug!("ignoring mismatched reply {body:?} during {kind:?} quorum");
        }
    }
}

/// Applies the operation on the coordinator itself and returns the local
/// GET payload, if any.
async fn apply_locally(ctx: &NodeCtx, task: &CoordinateTask, parsed: Option<ShoppingList>) -> Option<String> {
    let mut state = ctx.state.write().await;
    match task.kind {
        QuorumKind::Put => {
            if let Some(list) = parsed {
                state.write(task.key, list);
            }
            None
        }
        QuorumKind::Delete => {
            state.delete(&task.key);
            drop(state);
            if let Err(e) = ctx.store.delete(&task.key) {
                warn!("local store delete failed for {}: {e}", task.key);
            }
            None
        }
        QuorumKind::Get => state.read(&task.key).and_then(|list| match list.to_json() {
            Ok(json) => Some(json),
            Err(e) => {
                warn!("failed to encode local read of {}: {e}", task.key);
                None
            }
        }),
    }
}

async fn send_replica_request(ctx: &NodeCtx, task: &CoordinateTask, peer: &NodeAddr) {
    let quorum_id = Some(QuorumId::Id(task.quorum_id));
    let message = match task.kind {
        QuorumKind::Get => Message::Get {
            key: task.key,
            quorum_id,
        },
        QuorumKind::Put => Message::Put {
            key: task.key,
            value: task.value.clone().unwrap_or_default(),
            quorum_id,
        },
        QuorumKind::Delete => Message::Delete {
            key: task.key,
            quorum_id,
        },
    };
    if let Err(e) = ctx.transport.send(peer, message).await {
        debug!("replica send to {peer} failed: {e}");
        ctx.state.write().await.mark_suspect(peer);
    }
}
