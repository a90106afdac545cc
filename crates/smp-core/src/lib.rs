//! # SMP Core
//!
//! Queue and agent layers of the SimpleX Messaging Protocol client.
//!
//! This crate provides:
//! - Command transmissions and response parsing (`NEW`, `SUB`, `SEND`,
//!   `SKEY`, `ACK`, `DEL` / `IDS`, `OK`, `MSG`, `ERR`, `END`)
//! - Queue manager with signed commands and server envelope decryption
//! - Fixed-capacity contact table with pluggable persistence
//! - Invitation links and server addresses
//! - Agent envelopes, the HELLO chain and the handshake state machine
//! - Opportunistic message parser
//! - [`SmpClient`], which drives all of the above over two servers
//!
//! ## Layers
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  agent message    'M' msgId prevHash ('H' | 'M' text)        │
//! ├──────────────────────────────────────────────────────────────┤
//! │  double ratchet   AES-256-GCM header + payload, padded       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  client message   crypto_box to the queue's DH key           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  server envelope  crypto_box from server to recipient        │
//! ├──────────────────────────────────────────────────────────────┤
//! │  transmission     signature, session id, corrId, entity id   │
//! ├──────────────────────────────────────────────────────────────┤
//! │  block            16384 bytes over TLS 1.3 (smp/1)           │
//! └──────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod agent;
pub mod client;
pub mod config;
pub mod connection;
pub mod contact;
pub mod encoding;
pub mod error;
pub mod invitation;
pub mod parser;
pub mod queue;
pub mod serde_hex;
pub mod storage;
pub mod transmission;

pub use agent::{AgentConnection, HandshakeState, Profile};
pub use client::{ClientEvent, ClientStatus, SmpClient};
pub use config::{ClientConfig, TimeoutConfig};
pub use connection::SmpConnection;
pub use contact::{ContactRecord, ContactStore, ContactTable, MAX_CONTACTS};
pub use error::{Error, HandshakeError, ParseError, QueueError, Result, StorageError};
pub use invitation::{LinkStyle, PendingPeer, ServerAddress};
pub use parser::IncomingMessage;
pub use queue::{QueueInfo, QueueRecord};
pub use storage::{ContactStorage, FileContactStorage, MemoryContactStorage};
pub use transmission::{Command, ServerMessage};
