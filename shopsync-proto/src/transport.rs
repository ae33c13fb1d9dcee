//! Transport layer abstraction.
//!
//! The protocol assumes addressed unicast with preserved message boundaries.
//! [`TcpTransport`] provides that over loopback/LAN TCP: one framed message
//! per connection, with a listener task fanning incoming envelopes into a
//! queue. [`mock::MockHub`] provides the same contract in memory for tests.

use crate::codec::{read_frame, write_frame};
use crate::error::{ProtoError, ProtoResult};
use crate::message::{Envelope, Message};
use async_trait::async_trait;
use shopsync_types::NodeAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Capacity of the incoming-envelope queue.
const INCOMING_QUEUE_SIZE: usize = 256;

/// An addressed-unicast transport with message boundaries.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The address peers can reach this endpoint at.
    fn local_addr(&self) -> &NodeAddr;

    /// Sends one message to a peer. Failure means the peer did not receive
    /// it; there is no retry at this layer.
    async fn send(&self, to: &NodeAddr, message: Message) -> ProtoResult<()>;

    /// Receives the next incoming envelope.
    /// Returns `None` when the transport is shutting down.
    async fn recv(&self) -> Option<Envelope>;
}

/// TCP transport: binds a listener and delivers each sent message over a
/// short-lived connection carrying a single frame.
pub struct TcpTransport {
    local: NodeAddr,
    incoming: Mutex<mpsc::Receiver<Envelope>>,
    accept_task: JoinHandle<()>,
}

impl TcpTransport {
    /// Binds a listener on `addr` (use port 0 for an ephemeral port; the
    /// resolved address is reported by [`Transport::local_addr`]).
    pub async fn bind(addr: &str) -> ProtoResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local = NodeAddr::new(listener.local_addr()?.to_string());
        let (tx, rx) = mpsc::channel(INCOMING_QUEUE_SIZE);

        let accept_task = tokio::spawn(accept_loop(listener, tx));

        Ok(Self {
            local,
            incoming: Mutex::new(rx),
            accept_task,
        })
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn local_addr(&self) -> &NodeAddr {
        &self.local
    }

    async fn send(&self, to: &NodeAddr, message: Message) -> ProtoResult<()> {
        let mut stream = TcpStream::connect(to.as_str())
            .await
            .map_err(|e| ProtoError::Unreachable(format!("{to}: {e}")))?;
        let envelope = Envelope {
            from: self.local.clone(),
            message,
        };
        write_frame(&mut stream, &envelope).await?;
        Ok(())
    }

    async fn recv(&self) -> Option<Envelope> {
        self.incoming.lock().await.recv().await
    }
}

async fn accept_loop(listener: TcpListener, tx: mpsc::Sender<Envelope>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            }
        };
        let tx = tx.clone();
        tokio::spawn(async move {
            read_connection(stream, tx, peer.to_string()).await;
        });
    }
}

/// Reads frames off one connection until EOF. A malformed frame is logged
/// and the connection dropped; no response is sent.
async fn read_connection(mut stream: TcpStream, tx: mpsc::Sender<Envelope>, peer: String) {
    loop {
        match read_frame::<Envelope, _>(&mut stream).await {
            Ok(envelope) => {
                debug!(
                    from = %envelope.from,
                    kind = envelope.message.type_name(),
                    "received message"
                );
                if tx.send(envelope).await.is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return,
            Err(e) => {
                warn!("discarding malformed message from {peer}: {e}");
                return;
            }
        }
    }
}

/// In-memory transport for tests.
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// A registry of in-memory endpoints. Envelopes sent to a registered
    /// address land in that endpoint's queue; sends to an unregistered (or
    /// disconnected) address fail like a refused connection.
    #[derive(Clone, Default)]
    pub struct MockHub {
        peers: Arc<std::sync::Mutex<HashMap<NodeAddr, mpsc::Sender<Envelope>>>>,
    }

    impl MockHub {
        /// Creates an empty hub.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Registers an endpoint and returns its transport handle.
        pub fn endpoint(&self, addr: impl Into<String>) -> MockTransport {
            let addr = NodeAddr::new(addr);
            let (tx, rx) = mpsc::channel(INCOMING_QUEUE_SIZE);
            self.peers.lock().unwrap().insert(addr.clone(), tx);
            MockTransport {
                hub: self.clone(),
                local: addr,
                incoming: Mutex::new(rx),
            }
        }

        /// Simulates a crashed endpoint: subsequent sends to it fail.
        pub fn disconnect(&self, addr: &NodeAddr) {
            self.peers.lock().unwrap().remove(addr);
        }

        fn sender_for(&self, addr: &NodeAddr) -> Option<mpsc::Sender<Envelope>> {
            self.peers.lock().unwrap().get(addr).cloned()
        }
    }

    /// One endpoint on a [`MockHub`].
    pub struct MockTransport {
        hub: MockHub,
        local: NodeAddr,
        incoming: Mutex<mpsc::Receiver<Envelope>>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        fn local_addr(&self) -> &NodeAddr {
            &self.local
        }

        async fn send(&self, to: &NodeAddr, message: Message) -> ProtoResult<()> {
            let Some(tx) = self.hub.sender_for(to) else {
                return Err(ProtoError::Unreachable(to.to_string()));
            };
            let envelope = Envelope {
                from: self.local.clone(),
                message,
            };
            tx.send(envelope)
                .await
                .map_err(|_| ProtoError::ChannelClosed)
        }

        async fn recv(&self) -> Option<Envelope> {
            self.incoming.lock().await.recv().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockHub;
    use super::*;

    #[tokio::test]
    async fn tcp_transport_delivers_messages() {
        let a = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        let b = TcpTransport::bind("127.0.0.1:0").await.unwrap();

        a.send(b.local_addr(), Message::Heartbeat).await.unwrap();

        let envelope = b.recv().await.unwrap();
        assert_eq!(&envelope.from, a.local_addr());
        assert_eq!(envelope.message, Message::Heartbeat);
    }

    #[tokio::test]
    async fn tcp_send_to_dead_peer_fails() {
        let a = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        let b = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        let dead = b.local_addr().clone();
        drop(b);
        // Give the OS a moment to release the listener.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(a.send(&dead, Message::Heartbeat).await.is_err());
    }

    #[tokio::test]
    async fn mock_hub_routes_and_disconnects() {
        let hub = MockHub::new();
        let a = hub.endpoint("a:1");
        let b = hub.endpoint("b:1");

        a.send(b.local_addr(), Message::HealthCheck).await.unwrap();
        let envelope = b.recv().await.unwrap();
        assert_eq!(envelope.message, Message::HealthCheck);

        let b_addr = b.local_addr().clone();
        hub.disconnect(&b_addr);
        assert!(a.send(&b_addr, Message::Heartbeat).await.is_err());
    }
}
