//! Agent layer: end-to-end connections on top of SMP queues.
//!
//! - [`hello`]: agent messages and their msgId / prevHash chain
//! - [`envelope`]: client message, agent envelope, confirmation and
//!   connection info encodings
//! - [`handshake`]: per-peer [`AgentConnection`] and its state machine

pub mod envelope;
pub mod handshake;
pub mod hello;

pub use envelope::{ClientMessage, Confirmation, ConnInfoReply, Profile};
pub use handshake::{AgentConnection, HandshakeState, InvitationKeys};
pub use hello::{AgentBody, AgentMessage, MessageChain, parse_hello};
