//! Hinted-handoff flush loop.
//!
//! Every flush interval the node probes each peer it holds hints for. A peer
//! that answers the health check within the timeout receives every deferred
//! write as PUT_HANDED_OFF (carrying this node's *current* merged state for
//! the key, not the state at hint time) and every deferred delete as
//! DELETE_HANDED_OFF. Hint records are purged only after a healthy probe.
//! After replaying, the node re-checks ring entitlement for each key and
//! drops local copies it no longer owns.

use crate::coordinator::NodeCtx;
use shopsync_proto::Message;
use shopsync_types::ListId;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runs forever; aborted by the service on shutdown.
pub(crate) async fn run_hint_loop(ctx: NodeCtx) {
    let mut interval = tokio::time::interval(ctx.config.hint_flush_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so a freshly started node
    // does not probe before it has a ring.
    interval.tick().await;
    loop {
        interval.tick().await;
        flush_hints(&ctx).await;
    }
}

/// One probe-and-replay pass over every hinted peer.
pub(crate) async fn flush_hints(ctx: &NodeCtx) {
    let peers = ctx.state.read().await.hinted_peers();
    if peers.is_empty() {
        return;
    }

    let probe_start = Instant::now();
    for peer in &peers {
        if let Err(e) = ctx.transport.send(peer, Message::HealthCheck).await {
            debug!("hint probe to {peer} failed: {e}");
        }
    }

    // Responses are recorded by the receive loop while we wait.
    tokio::time::sleep(ctx.config.health_check_timeout).await;

    for peer in peers {
        let answered = ctx
            .state
            .read()
            .await
            .last_seen(&peer)
            .is_some_and(|seen| seen >= probe_start);
        if !answered {
            continue;
        }

        let (writes, deletes) = ctx.state.write().await.take_hints(&peer);
        if writes.is_empty() && deletes.is_empty() {
            continue;
        }
        info!(
            %peer,
            writes = writes.len(),
            deletes = deletes.len(),
            "flushing hints to recovered peer"
        );

        for key in &writes {
            let payload = {
                let mut state = ctx.state.write().await;
                state.read(key).map(|list| list.to_json())
            };
            match payload {
                Some(Ok(value)) => {
                    let message = Message::PutHandedOff { key: *key, value };
                    if let Err(e) = ctx.transport.send(&peer, message).await {
                        warn!("handoff of {key} to {peer} failed: {e}");
                        ctx.state.write().await.record_write_hint(peer.clone(), *key);
                    }
                }
                Some(Err(e)) => warn!("failed to encode {key} for handoff: {e}"),
                // The hinted key has since been deleted locally; nothing to
                // hand off.
                None => {}
            }
        }

        for key in &deletes {
            let message = Message::DeleteHandedOff { key: *key };
            if let Err(e) = ctx.transport.send(&peer, message).await {
                warn!("delete handoff of {key} to {peer} failed: {e}");
                ctx.state.write().await.record_delete_hint(peer.clone(), *key);
            }
        }

        drop_unowned_keys(ctx, writes.iter().chain(deletes.iter())).await;
    }
}

/// Drops local copies of keys this node is no longer entitled to hold.
async fn drop_unowned_keys(ctx: &NodeCtx, keys: impl Iterator<Item = &ListId>) {
    for key in keys {
        let dropped = {
            let mut state = ctx.state.write().await;
            if state.holds(key) && !state.entitled(key) {
                state.delete(key)
            } else {
                false
            }
        };
        if dropped {
            debug!("dropped {key}: no longer in its owner set");
            if let Err(e) = ctx.store.delete(key) {
                warn!("local store delete failed for {key}: {e}");
            }
        }
    }
}
