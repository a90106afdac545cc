//! # SMP Transport
//!
//! Transport layer for the SimpleX Messaging Protocol client.
//!
//! This crate provides:
//! - TLS 1.3 connections pinned to ALPN `smp/1`
//! - Fixed 16384-byte block framing with `#` padding
//! - Server hello parsing and client hello construction
//! - Bounded block reads that keep partially received blocks
//!
//! The queue layer talks to servers only through the [`BlockTransport`]
//! and [`Connector`] traits.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod block;
pub mod handshake;
pub mod session;
pub mod tls;
pub mod transport;

pub use session::{SmpSession, TransportState};
pub use tls::TlsConnector;
pub use transport::{
    BlockRead, BlockTransport, Connector, TransportError, TransportResult, TransportStats,
};
