//! Wire protocol, framing and transport for ShopSync.
//!
//! Three message flows share one tagged message set:
//! - client ↔ router (GET/PUT/DELETE and their responses)
//! - router ↔ node (registration, health, COORDINATE_*)
//! - node ↔ node (replica traffic, hints, handoff)
//!
//! Messages are UTF-8 JSON behind a 4-byte big-endian length prefix; the
//! [`Transport`] trait abstracts delivery so the node and router logic can be
//! tested against an in-memory hub instead of TCP.

mod codec;
mod error;
mod message;
mod transport;

pub use codec::{read_frame, write_frame, MAX_MESSAGE_SIZE};
pub use error::{ProtoError, ProtoResult};
pub use message::{Envelope, Message};
pub use transport::{mock, TcpTransport, Transport};
