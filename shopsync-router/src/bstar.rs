//! Binary-star finite state machine for the router pair.
//!
//! Two routers — one started as primary, one as backup — exchange state
//! beats over a dedicated link. Combining the local state with the last
//! received peer state drives the transitions below; exactly one router is
//! ACTIVE at a time. A PASSIVE router only promotes itself on a client
//! request once the peer has missed two beats.

use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{info, warn};

/// Router role states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BStarState {
    /// Started as primary, waiting for the peer.
    Primary,
    /// Started as backup, waiting for the peer.
    Backup,
    /// Serving clients.
    Active,
    /// Standing by.
    Passive,
}

impl BStarState {
    fn wire_byte(self) -> u8 {
        match self {
            Self::Primary => b'1',
            Self::Backup => b'2',
            Self::Active => b'3',
            Self::Passive => b'4',
        }
    }

    fn from_wire_byte(byte: u8) -> Option<Self> {
        match byte {
            b'1' => Some(Self::Primary),
            b'2' => Some(Self::Backup),
            b'3' => Some(Self::Active),
            b'4' => Some(Self::Passive),
            _ => None,
        }
    }
}

/// Unrecoverable split-brain conditions. The affected router must abort;
/// clients will retry against the peer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BStarError {
    #[error("fatal error - dual masters, aborting")]
    DualMasters,
    #[error("fatal error - dual slaves, aborting")]
    DualSlaves,
}

/// The local half of the router pair.
#[derive(Debug)]
pub struct BStarFsm {
    state: BStarState,
    peer_expiry: Option<Instant>,
    heartbeat: Duration,
}

impl BStarFsm {
    /// Creates the FSM in the PRIMARY start state.
    #[must_use]
    pub fn primary(heartbeat: Duration) -> Self {
        info!("primary master, waiting for backup (slave)");
        Self {
            state: BStarState::Primary,
            peer_expiry: None,
            heartbeat,
        }
    }

    /// Creates the FSM in the BACKUP start state.
    #[must_use]
    pub fn backup(heartbeat: Duration) -> Self {
        info!("backup slave, waiting for primary (master)");
        Self {
            state: BStarState::Backup,
            peer_expiry: None,
            heartbeat,
        }
    }

    /// The current local state.
    #[must_use]
    pub fn state(&self) -> BStarState {
        self.state
    }

    /// True once the peer has missed two heartbeats.
    #[must_use]
    pub fn peer_expired(&self, now: Instant) -> bool {
        match self.peer_expiry {
            Some(expiry) => now > expiry,
            // Never heard from the peer at all.
            None => true,
        }
    }

    /// Applies a received peer state. Dual-master and dual-slave are fatal.
    pub fn handle_peer_state(
        &mut self,
        peer: BStarState,
        now: Instant,
    ) -> Result<(), BStarError> {
        use BStarState::*;
        let next = match (self.state, peer) {
            (Primary, Backup) => {
                info!("connected to backup (slave), ready as master");
                Some(Active)
            }
            (Primary, Active) => {
                info!("connected to backup (master), ready as slave");
                Some(Passive)
            }
            (Backup, Active) => {
                info!("connected to primary (master), ready as slave");
                Some(Passive)
            }
            (Active, Active) => return Err(BStarError::DualMasters),
            (Passive, Primary) => {
                info!("primary (slave) is restarting, ready as master");
                Some(Active)
            }
            (Passive, Backup) => {
                info!("backup (slave) is restarting, ready as master");
                Some(Active)
            }
            (Passive, Passive) => return Err(BStarError::DualSlaves),
            _ => None,
        };
        if let Some(state) = next {
            self.state = state;
        }
        self.peer_expiry = Some(now + 2 * self.heartbeat);
        Ok(())
    }

    /// Decides whether to accept a client request, promoting a PASSIVE
    /// router whose peer has expired. Rejected requests get no response;
    /// the client's own timeout retries the other router.
    pub fn handle_client_request(&mut self, now: Instant) -> bool {
        use BStarState::*;
        match self.state {
            Active => true,
            Passive => {
                if self.peer_expired(now) {
                    info!("peer expired, taking over as master");
                    self.state = Active;
                    true
                } else {
                    false
                }
            }
            Primary | Backup => false,
        }
    }
}

/// The state-beat link between the two routers.
///
/// Beats are single-byte datagrams sent every heartbeat; loss only delays
/// convergence because the state is re-sent continuously.
pub struct StateLink {
    socket: UdpSocket,
    peer: String,
}

impl StateLink {
    /// Binds the local beat socket and records the peer's beat address.
    pub async fn bind(local: &str, peer: &str) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(local).await?;
        Ok(Self {
            socket,
            peer: peer.to_string(),
        })
    }

    /// Wraps an already-bound socket (lets both ends of a pair be bound on
    /// ephemeral ports before either peer address is known).
    #[must_use]
    pub fn from_socket(socket: UdpSocket, peer: &str) -> Self {
        Self {
            socket,
            peer: peer.to_string(),
        }
    }

    /// The local beat address.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.socket.local_addr()
    }

    /// Sends one state beat to the peer. Best effort.
    pub async fn send_state(&self, state: BStarState) {
        if let Err(e) = self.socket.send_to(&[state.wire_byte()], &self.peer).await {
            warn!("state beat to {} failed: {e}", self.peer);
        }
    }

    /// Receives the next peer state beat, skipping malformed datagrams.
    pub async fn recv_state(&self) -> BStarState {
        let mut buf = [0u8; 8];
        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, _)) if len >= 1 => {
                    if let Some(state) = BStarState::from_wire_byte(buf[0]) {
                        return state;
                    }
                    warn!("discarding malformed state beat");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("state link receive failed: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BEAT: Duration = Duration::from_millis(100);

    #[test]
    fn primary_activates_when_backup_appears() {
        let mut fsm = BStarFsm::primary(BEAT);
        fsm.handle_peer_state(BStarState::Backup, Instant::now()).unwrap();
        assert_eq!(fsm.state(), BStarState::Active);
    }

    #[test]
    fn primary_yields_to_an_active_peer() {
        let mut fsm = BStarFsm::primary(BEAT);
        fsm.handle_peer_state(BStarState::Active, Instant::now()).unwrap();
        assert_eq!(fsm.state(), BStarState::Passive);
    }

    #[test]
    fn backup_goes_passive_under_active_primary() {
        let mut fsm = BStarFsm::backup(BEAT);
        fsm.handle_peer_state(BStarState::Active, Instant::now()).unwrap();
        assert_eq!(fsm.state(), BStarState::Passive);
    }

    #[test]
    fn dual_masters_is_fatal() {
        let mut fsm = BStarFsm::primary(BEAT);
        fsm.handle_peer_state(BStarState::Backup, Instant::now()).unwrap();
        assert_eq!(
            fsm.handle_peer_state(BStarState::Active, Instant::now()),
            Err(BStarError::DualMasters)
        );
    }

    #[test]
    fn dual_slaves_is_fatal() {
        let mut fsm = BStarFsm::primary(BEAT);
        fsm.handle_peer_state(BStarState::Active, Instant::now()).unwrap();
        assert_eq!(fsm.state(), BStarState::Passive);
        assert_eq!(
            fsm.handle_peer_state(BStarState::Passive, Instant::now()),
            Err(BStarError::DualSlaves)
        );
    }

    #[test]
    fn passive_promotes_when_peer_restarts() {
        let mut fsm = BStarFsm::backup(BEAT);
        fsm.handle_peer_state(BStarState::Active, Instant::now()).unwrap();
        fsm.handle_peer_state(BStarState::Primary, Instant::now()).unwrap();
        assert_eq!(fsm.state(), BStarState::Active);
    }

    #[test]
    fn start_states_reject_clients() {
        let now = Instant::now();
        assert!(!BStarFsm::primary(BEAT).handle_client_request(now));
        assert!(!BStarFsm::backup(BEAT).handle_client_request(now));
    }

    #[test]
    fn active_accepts_clients() {
        let mut fsm = BStarFsm::primary(BEAT);
        fsm.handle_peer_state(BStarState::Backup, Instant::now()).unwrap();
        assert!(fsm.handle_client_request(Instant::now()));
    }

    #[test]
    fn passive_rejects_while_peer_is_fresh() {
        let now = Instant::now();
        let mut fsm = BStarFsm::backup(BEAT);
        fsm.handle_peer_state(BStarState::Active, now).unwrap();
        assert!(!fsm.handle_client_request(now + BEAT));
        assert_eq!(fsm.state(), BStarState::Passive);
    }

    #[test]
    fn passive_promotes_only_after_two_missed_beats() {
        let now = Instant::now();
        let mut fsm = BStarFsm::backup(BEAT);
        fsm.handle_peer_state(BStarState::Active, now).unwrap();

        // One beat late: still covered by the expiry window.
        assert!(!fsm.handle_client_request(now + BEAT));
        // Past two beats: take over.
        assert!(fsm.handle_client_request(now + 2 * BEAT + Duration::from_millis(1)));
        assert_eq!(fsm.state(), BStarState::Active);
    }

    #[test]
    fn beats_refresh_the_expiry_window() {
        let now = Instant::now();
        let mut fsm = BStarFsm::backup(BEAT);
        fsm.handle_peer_state(BStarState::Active, now).unwrap();
        let later = now + 2 * BEAT;
        fsm.handle_peer_state(BStarState::Active, later).unwrap();
        assert!(!fsm.peer_expired(later + BEAT));
        assert!(fsm.peer_expired(later + 2 * BEAT + Duration::from_millis(1)));
    }

    #[tokio::test]
    async fn state_link_carries_beats() {
        let a = StateLink::bind("127.0.0.1:0", "127.0.0.1:1").await.unwrap();
        let a_addr = a.socket.local_addr().unwrap().to_string();
        let b = StateLink::bind("127.0.0.1:0", &a_addr).await.unwrap();

        b.send_state(BStarState::Active).await;
        let received = a.recv_state().await;
        assert_eq!(received, BStarState::Active);
    }
}
