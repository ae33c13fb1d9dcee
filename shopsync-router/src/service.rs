//! The router service: front door, membership, election, failover.

use crate::activity::ActivityTable;
use crate::bstar::{BStarFsm, StateLink};
use crate::config::RouterConfig;
use crate::error::RouterResult;
use shopsync_proto::{Envelope, Message, Transport};
use shopsync_ring::HashRing;
use shopsync_types::{ListId, NodeAddr, QuorumId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Queue sizes for the two worker lanes.
const CONTROL_QUEUE_SIZE: usize = 64;
const CLIENT_QUEUE_SIZE: usize = 64;

/// How often the election loop re-checks for probe responses.
const ELECTION_POLL: Duration = Duration::from_millis(10);

/// Which half of the router pair this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterRole {
    Primary,
    Backup,
}

/// The kind of client request being tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Get,
    Put,
    Delete,
}

/// A client request forwarded to a coordinator, awaiting its outcome.
#[derive(Debug)]
struct ForwardedRequest {
    kind: RequestKind,
    key: ListId,
    client: NodeAddr,
}

/// A client request queued for the heavy worker.
#[derive(Debug)]
struct ClientRequest {
    kind: RequestKind,
    key: ListId,
    value: Option<String>,
    client: NodeAddr,
}

/// Ring, node list and activity, mutated together.
struct RouterShared {
    ring: HashRing,
    nodes: Vec<NodeAddr>,
    activity: ActivityTable,
}

/// Handles shared by the router's tasks.
#[derive(Clone)]
struct RouterCtx {
    transport: Arc<dyn Transport>,
    config: RouterConfig,
    shared: Arc<RwLock<RouterShared>>,
    forwarded: Arc<Mutex<HashMap<Uuid, ForwardedRequest>>>,
}

/// A running router.
pub struct RouterService {
    ctx: RouterCtx,
    state_link: Arc<StateLink>,
    role: RouterRole,
}

impl RouterService {
    /// Builds a router around a bound transport and state link.
    pub fn new(
        transport: Arc<dyn Transport>,
        state_link: StateLink,
        config: RouterConfig,
        role: RouterRole,
    ) -> Self {
        let shared = RouterShared {
            ring: HashRing::new(config.vnodes, config.replication),
            nodes: Vec::new(),
            activity: ActivityTable::new(),
        };
        let ctx = RouterCtx {
            transport,
            config,
            shared: Arc::new(RwLock::new(shared)),
            forwarded: Arc::new(Mutex::new(HashMap::new())),
        };
        Self {
            ctx,
            state_link: Arc::new(state_link),
            role,
        }
    }

    /// This router's client-facing address.
    #[must_use]
    pub fn addr(&self) -> NodeAddr {
        self.ctx.transport.local_addr().clone()
    }

    /// Serves until `shutdown` resolves. Returns an error on a fatal
    /// split-brain condition, which the binary turns into an abort.
    pub async fn run<F>(&self, shutdown: F) -> RouterResult<()>
    where
        F: Future<Output = ()> + Send,
    {
        let mut fsm = match self.role {
            RouterRole::Primary => BStarFsm::primary(self.ctx.config.bstar_heartbeat),
            RouterRole::Backup => BStarFsm::backup(self.ctx.config.bstar_heartbeat),
        };

        let (control_tx, mut control_rx) = mpsc::channel::<Envelope>(CONTROL_QUEUE_SIZE);
        let (client_tx, mut client_rx) = mpsc::channel::<ClientRequest>(CLIENT_QUEUE_SIZE);

        // Router worker: registration and coordinator outcomes.
        let worker_ctx = self.ctx.clone();
        let worker = tokio::spawn(async move {
            while let Some(envelope) = control_rx.recv().await {
                handle_control(&worker_ctx, envelope).await;
            }
        });

        // Heavy worker: client requests (election blocks up to the probe
        // window, so it gets its own lane).
        let heavy_ctx = self.ctx.clone();
        let heavy = tokio::spawn(async move {
            while let Some(request) = client_rx.recv().await {
                handle_client_request(&heavy_ctx, request).await;
            }
        });

        let monitor = tokio::spawn(run_monitor(self.ctx.clone()));

        let mut beat = tokio::time::interval(self.ctx.config.bstar_heartbeat);
        beat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tokio::pin!(shutdown);
        let result = loop {
            tokio::select! {
                envelope = self.ctx.transport.recv() => {
                    match envelope {
                        Some(envelope) => {
                            self.dispatch(envelope, &mut fsm, &control_tx, &client_tx).await;
                        }
                        None => break Ok(()),
                    }
                }
                peer_state = self.state_link.recv_state() => {
                    if let Err(e) = fsm.handle_peer_state(peer_state, Instant::now()) {
                        error!("{e}");
                        break Err(e.into());
                    }
                }
                _ = beat.tick() => {
                    self.state_link.send_state(fsm.state()).await;
                }
                () = &mut shutdown => break Ok(()),
            }
        };

        worker.abort();
        heavy.abort();
        monitor.abort();
        result
    }

    async fn dispatch(
        &self,
        envelope: Envelope,
        fsm: &mut BStarFsm,
        control_tx: &mpsc::Sender<Envelope>,
        client_tx: &mpsc::Sender<ClientRequest>,
    ) {
        let from = envelope.from;
        match envelope.message {
            // ── Client data plane ────────────────────────────────
            message @ (Message::Get { .. } | Message::Put { .. } | Message::Delete { .. }) => {
                if !fsm.handle_client_request(Instant::now()) {
                    debug!("not active; dropping client request from {from}");
                    return;
                }
                let request = match message {
                    Message::Get { key, .. } => ClientRequest {
                        kind: RequestKind::Get,
                        key,
                        value: None,
                        client: from,
                    },
                    Message::Put { key, value, .. } => ClientRequest {
                        kind: RequestKind::Put,
                        key,
                        value: Some(value),
                        client: from,
                    },
                    Message::Delete { key, .. } => ClientRequest {
                        kind: RequestKind::Delete,
                        key,
                        value: None,
                        client: from,
                    },
                    _ => unreachable!(),
                };
                if client_tx.send(request).await.is_err() {
                    warn!("heavy worker is gone; dropping client request");
                }
            }

            // ── Node liveness evidence ───────────────────────────
            Message::HeartbeatResponse { address } | Message::HealthCheckResponse { address } => {
                self.ctx
                    .shared
                    .write()
                    .await
                    .activity
                    .mark_active(&address, Instant::now());
            }

            // ── Control lane ─────────────────────────────────────
            message @ (Message::Register { .. }
            | Message::CoordinateGetResponse { .. }
            | Message::CoordinatePutResponse { .. }
            | Message::CoordinateDeleteResponse { .. }) => {
                // A coordinator response is also liveness evidence.
                self.ctx
                    .shared
                    .write()
                    .await
                    .activity
                    .mark_active(&from, Instant::now());
                if control_tx.send(Envelope { from, message }).await.is_err() {
                    warn!("router worker is gone; dropping control message");
                }
            }

            other => debug!("ignoring {} from {from}", other.type_name()),
        }
    }
}

/// Registration and coordinator outcomes.
async fn handle_control(ctx: &RouterCtx, envelope: Envelope) {
    match envelope.message {
        Message::Register { address } => handle_register(ctx, address).await,
        Message::CoordinateGetResponse { quorum_id, result } => {
            relay_outcome(ctx, quorum_id, Outcome::Get(result)).await;
        }
        Message::CoordinatePutResponse { quorum_id, result } => {
            relay_outcome(ctx, quorum_id, Outcome::Flag(result)).await;
        }
        Message::CoordinateDeleteResponse { quorum_id, result } => {
            relay_outcome(ctx, quorum_id, Outcome::Flag(result)).await;
        }
        other => debug!("unexpected control message {}", other.type_name()),
    }
}

async fn handle_register(ctx: &RouterCtx, address: NodeAddr) {
    let (previous, newly_added) = {
        let mut shared = ctx.shared.write().await;
        if shared.nodes.contains(&address) {
            // Re-registration after a restart: refresh, resend the ring.
            shared.activity.insert(address.clone(), Instant::now());
            let previous = shared
                .nodes
                .iter()
                .filter(|n| **n != address)
                .cloned()
                .collect::<Vec<_>>();
            (previous, false)
        } else {
            let previous = shared.nodes.clone();
            shared.ring.add_node(&address);
            shared.activity.insert(address.clone(), Instant::now());
            shared.nodes.push(address.clone());
            (previous, true)
        }
    };

    info!(
        "node {address} registered ({} previously known)",
        previous.len()
    );

    let response = Message::RegisterResponse {
        nodes: previous.clone(),
    };
    if let Err(e) = ctx.transport.send(&address, response).await {
        warn!("failed to answer REGISTER from {address}: {e}");
    }

    if newly_added {
        for node in &previous {
            let notice = Message::AddNode {
                address: address.clone(),
            };
            if let Err(e) = ctx.transport.send(node, notice).await {
                warn!("failed to notify {node} of new member: {e}");
            }
        }
    }
}

enum Outcome {
    Get(Option<String>),
    Flag(bool),
}

/// Relays a coordinator's final outcome to the waiting client. Late or
/// duplicate outcomes are dropped.
async fn relay_outcome(ctx: &RouterCtx, quorum_id: QuorumId, outcome: Outcome) {
    let QuorumId::Id(id) = quorum_id else {
        debug!("coordinator outcome with repair sentinel; dropping");
        return;
    };
    let Some(forwarded) = ctx.forwarded.lock().await.remove(&id) else {
        debug!("outcome for already-settled request {id}");
        return;
    };

    let address = ctx.transport.local_addr().clone();
    let response = match (forwarded.kind, outcome) {
        (RequestKind::Get, Outcome::Get(value)) => Message::GetResponse {
            key: forwarded.key,
            value,
            address,
            quorum_id: None,
        },
        (RequestKind::Put, Outcome::Flag(ok)) => Message::PutResponse {
            key: forwarded.key,
            value: ok,
            address,
            quorum_id: None,
        },
        (RequestKind::Delete, Outcome::Flag(ok)) => Message::DeleteResponse {
            key: forwarded.key,
            value: Some(ok),
            address,
            quorum_id: None,
        },
        (kind, _) => {
            warn!("outcome kind mismatch for {kind:?} request {id}");
            return;
        }
    };

    if let Err(e) = ctx.transport.send(&forwarded.client, response).await {
        warn!("failed to relay outcome to client {}: {e}", forwarded.client);
    }
}

/// One client request: elect a coordinator, forward, remember the mapping.
async fn handle_client_request(ctx: &RouterCtx, request: ClientRequest) {
    let key = request.key;
    let Some(coordinator) = elect_coordinator(ctx, &key).await else {
        warn!("no coordinator available for {key}");
        reply_failure(ctx, &request).await;
        return;
    };

    let id = Uuid::new_v4();
    let quorum_id = QuorumId::Id(id);
    let message = match request.kind {
        RequestKind::Get => Message::CoordinateGet { key, quorum_id },
        RequestKind::Put => Message::CoordinatePut {
            key,
            value: request.value.clone().unwrap_or_default(),
            quorum_id,
        },
        RequestKind::Delete => Message::CoordinateDelete { key, quorum_id },
    };

    ctx.forwarded.lock().await.insert(
        id,
        ForwardedRequest {
            kind: request.kind,
            key,
            client: request.client.clone(),
        },
    );

    debug!("forwarding {:?} on {key} to {coordinator}", request.kind);
    if let Err(e) = ctx.transport.send(&coordinator, message).await {
        warn!("coordinator {coordinator} unreachable: {e}");
        ctx.forwarded.lock().await.remove(&id);
        reply_failure(ctx, &request).await;
    }
}

/// Tells the client its request failed outright.
async fn reply_failure(ctx: &RouterCtx, request: &ClientRequest) {
    let address = ctx.transport.local_addr().clone();
    let response = match request.kind {
        RequestKind::Get => Message::GetResponse {
            key: request.key,
            value: None,
            address,
            quorum_id: None,
        },
        RequestKind::Put => Message::PutResponse {
            key: request.key,
            value: false,
            address,
            quorum_id: None,
        },
        RequestKind::Delete => Message::DeleteResponse {
            key: request.key,
            value: Some(false),
            address,
            quorum_id: None,
        },
    };
    if let Err(e) = ctx.transport.send(&request.client, response).await {
        debug!("failed to report failure to client {}: {e}", request.client);
    }
}

/// Probes the key's owner set and picks the coordinator: the first node to
/// answer within the window, preferring the primary if it answered at all.
async fn elect_coordinator(ctx: &RouterCtx, key: &ListId) -> Option<NodeAddr> {
    let candidates = {
        let shared = ctx.shared.read().await;
        shared.ring.ideal_replicas(&key.to_string())
    };
    if candidates.is_empty() {
        return None;
    }

    {
        let mut shared = ctx.shared.write().await;
        for candidate in &candidates {
            shared.activity.begin_probe(candidate);
        }
    }
    for candidate in &candidates {
        if let Err(e) = ctx.transport.send(candidate, Message::HealthCheck).await {
            debug!("health check to {candidate} failed: {e}");
        }
    }

    let deadline = Instant::now() + ctx.config.coordinator_health_check_timeout;
    let mut coordinator = None;
    loop {
        {
            let shared = ctx.shared.read().await;
            if let Some(found) = candidates
                .iter()
                .find(|c| shared.activity.is_available(c))
            {
                coordinator = Some(found.clone());
                break;
            }
        }
        if Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(ELECTION_POLL).await;
    }

    // Prefer the primary if it answered within the window, even when a
    // replica was spotted first.
    if let Some(found) = &coordinator {
        if *found != candidates[0] {
            let shared = ctx.shared.read().await;
            if shared.activity.is_available(&candidates[0]) {
                debug!("primary answered late; electing it anyway");
                coordinator = Some(candidates[0].clone());
            }
        }
    }

    {
        let mut shared = ctx.shared.write().await;
        for candidate in &candidates {
            shared.activity.begin_probe(candidate);
        }
    }
    coordinator
}

/// Periodic liveness monitor: evict silent nodes, then heartbeat-burst the
/// survivors.
async fn run_monitor(ctx: RouterCtx) {
    let mut interval = tokio::time::interval(ctx.config.monitor_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await;
    loop {
        interval.tick().await;

        let stale = {
            let shared = ctx.shared.read().await;
            shared
                .activity
                .stale_nodes(Instant::now(), ctx.config.timeout_threshold)
        };
        for node in stale {
            evict_node(&ctx, &node).await;
        }

        let nodes = ctx.shared.read().await.nodes.clone();
        for node in nodes {
            if let Err(e) = ctx.transport.send(&node, Message::Heartbeat).await {
                debug!("heartbeat to {node} failed: {e}");
            }
        }
    }
}

async fn evict_node(ctx: &RouterCtx, node: &NodeAddr) {
    warn!("node {node} is down; evicting");
    {
        let mut shared = ctx.shared.write().await;
        shared.ring.remove_node(node);
        shared.activity.remove(node);
        shared.nodes.retain(|n| n != node);
    }
    let survivors = ctx.shared.read().await.nodes.clone();
    for survivor in survivors {
        let notice = Message::RemoveNode {
            address: node.clone(),
        };
        if let Err(e) = ctx.transport.send(&survivor, notice).await {
            warn!("failed to notify {survivor} of eviction: {e}");
        }
    }
}
