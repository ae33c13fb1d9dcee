//! Front-end router for ShopSync.
//!
//! The router is the stateful front door of the store. It maintains the
//! authoritative consistent-hash ring, supervises node liveness with
//! heartbeats, elects a per-request coordinator by health-check probe, and
//! relays each coordinator's quorum outcome back to the requesting client.
//! Two routers run as an active/standby pair driven by the binary-star FSM
//! in [`bstar`]; exactly one serves clients at a time.
//!
//! # Task layout
//!
//! - a receive loop multiplexed over the message transport and the
//!   state-beat link
//! - a router worker for registration and coordinator outcomes
//! - a heavy worker for client requests (election blocks up to the probe
//!   window)
//! - a node-liveness monitor
//! - the state-beat sender

mod activity;
pub mod bstar;
mod config;
mod error;
mod service;

pub use activity::ActivityTable;
pub use bstar::{BStarError, BStarFsm, BStarState, StateLink};
pub use config::RouterConfig;
pub use error::{RouterError, RouterResult};
pub use service::{RouterRole, RouterService};
