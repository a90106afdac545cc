//! Block transport trait and transport errors.
//!
//! SMP servers exchange fixed 16384-byte blocks. [`BlockTransport`] is the
//! seam between the queue layer and the byte stream: the TLS session
//! implements it in production, in-memory streams implement it in tests.

use crate::block::encode_command_content;
use async_trait::async_trait;
use std::io;
use std::time::Duration;

/// Transport layer errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Host name could not be resolved
    #[error("DNS resolution failed for {0}")]
    DnsFailure(String),

    /// TCP connection failed or timed out
    #[error("TCP connect failed: {0}")]
    TcpConnectFailed(String),

    /// TLS handshake failed
    #[error("TLS handshake failed: {0}")]
    TlsHandshakeFailed(String),

    /// Server did not negotiate the `smp/1` ALPN protocol
    #[error("ALPN mismatch: server selected {0:?}")]
    AlpnMismatch(Option<String>),

    /// No complete block arrived before the deadline
    #[error("timed out waiting for block ({received} bytes received)")]
    BlockTimeout {
        /// Bytes of the pending block already received
        received: usize,
    },

    /// Block content length exceeds the maximum
    #[error("block too large: {0} bytes")]
    BlockTooLarge(usize),

    /// Peer closed the connection
    #[error("connection closed")]
    ConnectionClosed,

    /// I/O error from the underlying stream
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed server or client hello
    #[error("invalid handshake: {0}")]
    InvalidHandshake(String),

    /// Server certificate hash does not match the pinned key hash
    #[error("server key hash mismatch")]
    KeyHashMismatch,

    /// Server does not support our protocol version
    #[error("unsupported server version range {min}-{max}")]
    UnsupportedVersion {
        /// Minimum server version
        min: u16,
        /// Maximum server version
        max: u16,
    },
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Outcome of a bounded block read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockRead {
    /// A complete block; holds the content without length prefix or padding
    Block(Vec<u8>),
    /// Deadline passed with no bytes of a new block received
    Idle,
    /// Deadline passed after this many bytes of a block arrived; they are
    /// kept and the next read continues the same block
    Partial(usize),
}

/// Async block transport for SMP sessions.
///
/// Implementations own exactly one server session; two sessions never
/// share mutable state.
#[async_trait]
pub trait BlockTransport: Send {
    /// Read one block, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] on EOF and
    /// [`TransportError::BlockTooLarge`] for an invalid length prefix.
    async fn read_block(&mut self, timeout: Duration) -> TransportResult<BlockRead>;

    /// Write `content` as one padded block.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::BlockTooLarge`] if content exceeds the block.
    async fn write_block(&mut self, content: &[u8]) -> TransportResult<()>;

    /// Write a single transmission wrapped as `[txCount=1][txLen][transmission]`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::BlockTooLarge`] if the transmission does not fit.
    async fn write_command_block(&mut self, transmission: &[u8]) -> TransportResult<()> {
        let content = encode_command_content(transmission)?;
        self.write_block(&content).await
    }

    /// Session identifier announced by the server hello.
    fn session_id(&self) -> &[u8];

    /// SHA-256 key hash of the server certificate.
    fn server_key_hash(&self) -> [u8; 32];

    /// Close the session.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if shutting down the stream fails.
    async fn close(&mut self) -> TransportResult<()>;

    /// Transport statistics.
    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

/// Opens authenticated sessions to SMP servers.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `host:port`, completing TLS and the hello exchange.
    ///
    /// When `key_hash` is set the derived server key hash must match it.
    ///
    /// # Errors
    ///
    /// Returns the first transport failure encountered.
    async fn connect(
        &self,
        host: &str,
        port: u16,
        key_hash: Option<[u8; 32]>,
    ) -> TransportResult<Box<dyn BlockTransport>>;
}

/// Transport statistics
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    /// Total content bytes sent
    pub bytes_sent: u64,
    /// Total content bytes received
    pub bytes_received: u64,
    /// Blocks sent
    pub blocks_sent: u64,
    /// Blocks received
    pub blocks_received: u64,
    /// Reads that ended without a complete block
    pub idle_reads: u64,
}

impl TransportStats {
    /// Create new empty statistics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sent block
    pub fn record_send(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
        self.blocks_sent += 1;
    }

    /// Record a received block
    pub fn record_recv(&mut self, bytes: usize) {
        self.bytes_received += bytes as u64;
        self.blocks_received += 1;
    }

    /// Record a read that timed out
    pub fn record_idle(&mut self) {
        self.idle_reads += 1;
    }
}
