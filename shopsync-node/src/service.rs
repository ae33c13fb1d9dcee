//! The node service: receive loop, coordinator worker, timers.

use crate::config::NodeConfig;
use crate::coordinator::{run_quorum, CoordinateTask, NodeCtx, ReplicaReply, ReplyBody};
use crate::error::NodeResult;
use crate::handoff::run_hint_loop;
use crate::quorum::QuorumKind;
use crate::state::NodeState;
use shopsync_crdt::ShoppingList;
use shopsync_proto::{Envelope, Message, Transport};
use shopsync_storage::ListStore;
use shopsync_types::{ListId, NodeAddr, QuorumId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Capacity of the coordinator task queue.
const COORDINATE_QUEUE_SIZE: usize = 64;

/// A running storage node.
pub struct NodeService {
    ctx: NodeCtx,
    routers: Vec<NodeAddr>,
}

impl NodeService {
    /// Builds a node around a bound transport and an opened store. The node
    /// registers with every router of the pair so the standby also knows
    /// the membership.
    pub fn new(
        transport: Arc<dyn Transport>,
        store: ListStore,
        config: NodeConfig,
        routers: Vec<NodeAddr>,
    ) -> Self {
        let addr = transport.local_addr().clone();
        let state = NodeState::new(addr, config.vnodes, config.replication);
        let ctx = NodeCtx {
            transport,
            state: Arc::new(RwLock::new(state)),
            store: Arc::new(store),
            config,
            quorums: Arc::new(Mutex::new(HashMap::new())),
        };
        Self { ctx, routers }
    }

    /// This node's address.
    #[must_use]
    pub fn addr(&self) -> NodeAddr {
        self.ctx.transport.local_addr().clone()
    }

    /// Recovers persisted state and registers with the router.
    pub async fn start(&self) -> NodeResult<()> {
        let lists = self.ctx.store.load_all()?;
        let recovered = lists.len();
        {
            let mut state = self.ctx.state.write().await;
            for list in lists {
                state.load(list);
            }
        }
        if recovered > 0 {
            info!("recovered {recovered} lists from the local store");
        }

        for router in &self.routers {
            let register = Message::Register {
                address: self.addr(),
            };
            if let Err(e) = self.ctx.transport.send(router, register).await {
                warn!("failed to register with router {router}: {e}");
            }
        }
        Ok(())
    }

    /// Serves until `shutdown` resolves, then flushes all state to disk.
    pub async fn run<F>(&self, shutdown: F) -> NodeResult<()>
    where
        F: Future<Output = ()> + Send,
    {
        let (task_tx, mut task_rx) = mpsc::channel::<CoordinateTask>(COORDINATE_QUEUE_SIZE);

        // Coordinator worker: dequeues COORDINATE_* requests and spawns one
        // driver per quorum.
        let worker_ctx = self.ctx.clone();
        let worker = tokio::spawn(async move {
            while let Some(task) = task_rx.recv().await {
                let (reply_tx, reply_rx) = mpsc::unbounded_channel();
                worker_ctx
                    .quorums
                    .lock()
                    .await
                    .insert(task.quorum_id, reply_tx);
                tokio::spawn(run_quorum(worker_ctx.clone(), task, reply_rx));
            }
        });

        let hints = tokio::spawn(run_hint_loop(self.ctx.clone()));

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                envelope = self.ctx.transport.recv() => {
                    match envelope {
                        Some(envelope) => self.dispatch(envelope, &task_tx).await,
                        None => break,
                    }
                }
                () = &mut shutdown => break,
            }
        }

        worker.abort();
        hints.abort();
        self.flush_all().await;
        Ok(())
    }

    /// Flushes the full in-memory map over the store (shutdown path). A
    /// store failure is logged; memory remains authoritative until restart.
    pub async fn flush_all(&self) {
        let lists = self.ctx.state.write().await.collapse_all();
        match self.ctx.store.replace_all(lists.iter()) {
            Ok(()) => info!("flushed {} lists to the local store", lists.len()),
            Err(e) => warn!("shutdown flush failed: {e}"),
        }
    }

    async fn dispatch(&self, envelope: Envelope, task_tx: &mpsc::Sender<CoordinateTask>) {
        let from = envelope.from;
        self.ctx
            .state
            .write()
            .await
            .mark_seen(&from, Instant::now());

        match envelope.message {
            // ── Membership ───────────────────────────────────────
            Message::RegisterResponse { nodes } => {
                info!("registered; ring seeded with {} peers", nodes.len());
                self.ctx.state.write().await.rebuild_ring(&nodes);
            }
            Message::AddNode { address } => {
                debug!("ring: adding {address}");
                self.ctx.state.write().await.add_ring_node(&address);
            }
            Message::RemoveNode { address } => {
                debug!("ring: removing {address}");
                self.ctx.state.write().await.remove_ring_node(&address);
            }

            // ── Liveness ─────────────────────────────────────────
            Message::Heartbeat => {
                let response = Message::HeartbeatResponse {
                    address: self.addr(),
                };
                self.send_best_effort(&from, response).await;
            }
            Message::HealthCheck => {
                let response = Message::HealthCheckResponse {
                    address: self.addr(),
                };
                self.send_best_effort(&from, response).await;
            }
            // The sender was marked seen above, which is all a response
            // carries.
            Message::HeartbeatResponse { .. } | Message::HealthCheckResponse { .. } => {}

            // ── Replica traffic ──────────────────────────────────
            Message::Get { key, quorum_id } => self.handle_get(from, key, quorum_id).await,
            Message::Put {
                key,
                value,
                quorum_id,
            } => self.handle_put(from, key, value, quorum_id).await,
            Message::Delete { key, quorum_id } => {
                self.handle_delete(from, key, quorum_id).await;
            }

            Message::GetResponse {
                key,
                value,
                address,
                quorum_id,
            } => match quorum_id {
                Some(QuorumId::Repair) => self.absorb_repair(key, value).await,
                Some(QuorumId::Id(id)) => {
                    self.route_reply(id, address, ReplyBody::Get(value)).await;
                }
                None => debug!("GET_RESPONSE without quorum id from {address}"),
            },
            Message::PutResponse {
                value,
                address,
                quorum_id,
                ..
            } => {
                if let Some(QuorumId::Id(id)) = quorum_id {
                    self.route_reply(id, address, ReplyBody::Put(value)).await;
                }
            }
            Message::DeleteResponse {
                value,
                address,
                quorum_id,
                ..
            } => {
                if let Some(QuorumId::Id(id)) = quorum_id {
                    self.route_reply(id, address, ReplyBody::Delete(value)).await;
                }
            }

            // ── Coordinator orchestration ────────────────────────
            Message::CoordinateGet { key, quorum_id } => {
                self.enqueue(task_tx, QuorumKind::Get, key, None, quorum_id, from)
                    .await;
            }
            Message::CoordinatePut {
                key,
                value,
                quorum_id,
            } => {
                self.enqueue(task_tx, QuorumKind::Put, key, Some(value), quorum_id, from)
                    .await;
            }
            Message::CoordinateDelete { key, quorum_id } => {
                self.enqueue(task_tx, QuorumKind::Delete, key, None, quorum_id, from)
                    .await;
            }

            // ── Hinted handoff ───────────────────────────────────
            Message::WriteHint { key, target } => {
                debug!("holding write hint for {target} ({key})");
                self.ctx
                    .state
                    .write()
                    .await
                    .record_write_hint(target, key);
            }
            Message::DeleteHint { key, target } => {
                debug!("holding delete hint for {target} ({key})");
                self.ctx
                    .state
                    .write()
                    .await
                    .record_delete_hint(target, key);
            }
            Message::PutHandedOff { key, value } => match ShoppingList::from_json(&value) {
                Ok(list) => {
                    info!("absorbed handed-off write for {key}");
                    self.ctx.state.write().await.write(key, list);
                }
                Err(e) => warn!("discarding undecodable handoff for {key}: {e}"),
            },
            Message::DeleteHandedOff { key } => {
                info!("absorbed handed-off delete for {key}");
                if self.ctx.state.write().await.delete(&key) {
                    if let Err(e) = self.ctx.store.delete(&key) {
                        warn!("local store delete failed for {key}: {e}");
                    }
                }
            }

            // Router-only traffic; a node should never see it.
            other => debug!("ignoring {} from {from}", other.type_name()),
        }
    }

    async fn enqueue(
        &self,
        task_tx: &mpsc::Sender<CoordinateTask>,
        kind: QuorumKind,
        key: ListId,
        value: Option<String>,
        quorum_id: QuorumId,
        reply_to: NodeAddr,
    ) {
        let QuorumId::Id(id) = quorum_id else {
            warn!("coordinate request with repair sentinel; dropping");
            return;
        };
        let task = CoordinateTask {
            kind,
            key,
            value,
            quorum_id: id,
            reply_to,
        };
        if task_tx.send(task).await.is_err() {
            warn!("coordinator worker is gone; dropping request");
        }
    }

    async fn route_reply(&self, id: uuid::Uuid, from: NodeAddr, body: ReplyBody) {
        let quorums = self.ctx.quorums.lock().await;
        match quorums.get(&id) {
            Some(tx) => {
                let _ = tx.send(ReplicaReply { from, body });
            }
            None => debug!("late reply for settled quorum {id}"),
        }
    }

    async fn handle_get(&self, from: NodeAddr, key: ListId, quorum_id: Option<QuorumId>) {
        let (reply_value, to_flush, repair_peer) = {
            let mut state = self.ctx.state.write().await;
            let merged = state.read(&key);
            let reply_value = merged.as_ref().and_then(|list| match list.to_json() {
                Ok(json) => Some(json),
                Err(e) => {
                    warn!("failed to encode {key}: {e}");
                    None
                }
            });

            // Lazy write-back: persist after replying if the key is dirty.
            let to_flush = if merged.is_some() && state.take_dirty(&key) {
                merged.clone()
            } else {
                None
            };

            // Entitled but empty-handed: fetch a repair copy from another
            // ideal owner, unless this request is itself a repair.
            let repair_peer = if merged.is_none()
                && quorum_id != Some(QuorumId::Repair)
                && state.entitled(&key)
            {
                let me = state.addr().clone();
                state
                    .ring()
                    .ideal_replicas(&key.to_string())
                    .into_iter()
                    .find(|n| *n != me)
            } else {
                None
            };

            (reply_value, to_flush, repair_peer)
        };

        let response = Message::GetResponse {
            key,
            value: reply_value,
            address: self.addr(),
            quorum_id,
        };
        self.send_best_effort(&from, response).await;

        if let Some(list) = to_flush {
            if let Err(e) = self.ctx.store.save(&list) {
                warn!("lazy flush of {key} failed: {e}");
            }
        }

        if let Some(peer) = repair_peer {
            debug!("requesting repair copy of {key} from {peer}");
            let request = Message::Get {
                key,
                quorum_id: Some(QuorumId::Repair),
            };
            self.send_best_effort(&peer, request).await;
        }
    }

    async fn handle_put(
        &self,
        from: NodeAddr,
        key: ListId,
        value: String,
        quorum_id: Option<QuorumId>,
    ) {
        let ok = match ShoppingList::from_json(&value) {
            Ok(list) => {
                self.ctx.state.write().await.write(key, list);
                true
            }
            Err(e) => {
                warn!("refusing undecodable PUT for {key}: {e}");
                false
            }
        };
        let response = Message::PutResponse {
            key,
            value: ok,
            address: self.addr(),
            quorum_id,
        };
        self.send_best_effort(&from, response).await;
    }

    async fn handle_delete(&self, from: NodeAddr, key: ListId, quorum_id: Option<QuorumId>) {
        let present = self.ctx.state.write().await.delete(&key);
        if present {
            if let Err(e) = self.ctx.store.delete(&key) {
                warn!("local store delete failed for {key}: {e}");
            }
        }
        let response = Message::DeleteResponse {
            key,
            value: present.then_some(true),
            address: self.addr(),
            quorum_id,
        };
        self.send_best_effort(&from, response).await;
    }

    /// Merges a repair response into local state.
    async fn absorb_repair(&self, key: ListId, value: Option<String>) {
        let Some(raw) = value else {
            // The peer had nothing either; the key stays absent.
            return;
        };
        match ShoppingList::from_json(&raw) {
            Ok(list) => {
                info!("absorbed repair copy of {key}");
                self.ctx.state.write().await.write(key, list);
            }
            Err(e) => warn!("discarding undecodable repair for {key}: {e}"),
        }
    }

    async fn send_best_effort(&self, to: &NodeAddr, message: Message) {
        if let Err(e) = self.ctx.transport.send(to, message).await {
            debug!("send to {to} failed: {e}");
            self.ctx.state.write().await.mark_suspect(to);
        }
    }
}
