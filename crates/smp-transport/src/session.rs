//! Block session over an established byte stream.
//!
//! [`SmpSession`] owns one TLS stream (or any `AsyncRead + AsyncWrite`
//! stream in tests), performs the SMP hello exchange and then reads and
//! writes fixed-size blocks. Partially received blocks survive a read
//! timeout and are completed by the next read.

use crate::block::{BLOCK_SIZE, decode_block, encode_block};
use crate::handshake::{ClientHello, SMP_CLIENT_VERSION, ServerHello};
use crate::transport::{BlockRead, BlockTransport, TransportError, TransportResult, TransportStats};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

/// Transport connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// No connection
    Disconnected,
    /// TCP socket connected
    TcpConnected,
    /// TLS handshake in progress or complete, SMP hello pending
    TlsHandshaking,
    /// Server and client hello exchanged
    HelloExchanged,
    /// Session ready for commands
    Ready,
    /// Session closed
    Closed,
}

impl TransportState {
    /// Check if a state transition is valid
    #[must_use]
    pub fn can_transition(self, to: TransportState) -> bool {
        matches!(
            (self, to),
            (TransportState::Disconnected, TransportState::TcpConnected)
                | (TransportState::TcpConnected, TransportState::TlsHandshaking)
                | (TransportState::TlsHandshaking, TransportState::HelloExchanged)
                | (TransportState::HelloExchanged, TransportState::Ready)
                | (_, TransportState::Closed)
        )
    }
}

/// SMP block session over a stream
pub struct SmpSession<S> {
    stream: S,
    state: TransportState,
    session_id: Vec<u8>,
    key_hash: [u8; 32],
    server_versions: (u16, u16),
    pending: Vec<u8>,
    stats: TransportStats,
}

impl<S> SmpSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn new(stream: S) -> Self {
        Self {
            stream,
            state: TransportState::TlsHandshaking,
            session_id: Vec::new(),
            key_hash: [0u8; 32],
            server_versions: (0, 0),
            pending: Vec::with_capacity(BLOCK_SIZE),
            stats: TransportStats::new(),
        }
    }

    /// Run the SMP hello exchange over an already secured stream.
    ///
    /// The server key hash is derived from the certificates in the server
    /// hello, falling back to `fallback_hash` (taken from the TLS peer
    /// certificates) when the hello carries none. If `pinned` is set the
    /// derived hash must equal it.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidHandshake`] for a malformed or missing
    /// server hello, [`TransportError::UnsupportedVersion`] if the server
    /// does not speak version 6 and [`TransportError::KeyHashMismatch`] if
    /// the pinned hash differs.
    pub async fn handshake(
        stream: S,
        pinned: Option<[u8; 32]>,
        fallback_hash: Option<[u8; 32]>,
        timeout: Duration,
    ) -> TransportResult<Self> {
        let mut session = Self::new(stream);

        let content = match session.read_block(timeout).await? {
            BlockRead::Block(content) => content,
            BlockRead::Idle => {
                return Err(TransportError::InvalidHandshake(
                    "no server hello received".to_string(),
                ));
            }
            BlockRead::Partial(received) => {
                return Err(TransportError::BlockTimeout { received });
            }
        };

        let hello = ServerHello::parse(&content)?;
        tracing::debug!(
            "Server hello: versions {}-{}, session id {} bytes, {} certificates",
            hello.min_version,
            hello.max_version,
            hello.session_id.len(),
            hello.cert_chain.len()
        );
        hello.check_version()?;

        let derived = hello
            .key_hash()
            .or(fallback_hash)
            .ok_or_else(|| TransportError::InvalidHandshake("no server certificate".to_string()))?;
        if let Some(expected) = pinned {
            if expected != derived {
                return Err(TransportError::KeyHashMismatch);
            }
        }

        let client_hello = ClientHello {
            version: SMP_CLIENT_VERSION,
            key_hash: derived,
        };
        session.write_block(&client_hello.encode()).await?;

        session.session_id = hello.session_id;
        session.key_hash = derived;
        session.server_versions = (hello.min_version, hello.max_version);
        session.transition_to(TransportState::HelloExchanged)?;
        session.transition_to(TransportState::Ready)?;
        Ok(session)
    }

    /// Current transport state
    #[must_use]
    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Version range announced by the server
    #[must_use]
    pub fn server_versions(&self) -> (u16, u16) {
        self.server_versions
    }

    fn transition_to(&mut self, new_state: TransportState) -> TransportResult<()> {
        if !self.state.can_transition(new_state) {
            return Err(TransportError::InvalidHandshake(format!(
                "invalid transport transition {:?} -> {:?}",
                self.state, new_state
            )));
        }
        tracing::debug!(
            "Transport state transition: {:?} -> {:?}",
            self.state,
            new_state
        );
        self.state = new_state;
        Ok(())
    }

    fn mark_closed(&mut self) {
        if self.state != TransportState::Closed {
            tracing::debug!("Transport state transition: {:?} -> Closed", self.state);
            self.state = TransportState::Closed;
        }
    }
}

#[async_trait]
impl<S> BlockTransport for SmpSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read_block(&mut self, timeout: Duration) -> TransportResult<BlockRead> {
        if self.state == TransportState::Closed {
            return Err(TransportError::ConnectionClosed);
        }

        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 4096];

        while self.pending.len() < BLOCK_SIZE {
            let want = (BLOCK_SIZE - self.pending.len()).min(buf.len());
            let read = tokio::time::timeout_at(deadline, self.stream.read(&mut buf[..want])).await;
            match read {
                Err(_) => {
                    self.stats.record_idle();
                    return Ok(if self.pending.is_empty() {
                        BlockRead::Idle
                    } else {
                        BlockRead::Partial(self.pending.len())
                    });
                }
                Ok(Ok(0)) => {
                    self.mark_closed();
                    return Err(TransportError::ConnectionClosed);
                }
                Ok(Ok(n)) => self.pending.extend_from_slice(&buf[..n]),
                Ok(Err(e)) => {
                    self.mark_closed();
                    return Err(TransportError::Io(e));
                }
            }
        }

        let block = std::mem::take(&mut self.pending);
        self.pending.reserve(BLOCK_SIZE);
        let content = decode_block(&block)?.to_vec();
        self.stats.record_recv(content.len());
        Ok(BlockRead::Block(content))
    }

    async fn write_block(&mut self, content: &[u8]) -> TransportResult<()> {
        if self.state == TransportState::Closed {
            return Err(TransportError::ConnectionClosed);
        }
        let block = encode_block(content)?;
        if let Err(e) = self.stream.write_all(&block).await {
            self.mark_closed();
            return Err(TransportError::Io(e));
        }
        self.stream.flush().await?;
        self.stats.record_send(content.len());
        Ok(())
    }

    fn session_id(&self) -> &[u8] {
        &self.session_id
    }

    fn server_key_hash(&self) -> [u8; 32] {
        self.key_hash
    }

    async fn close(&mut self) -> TransportResult<()> {
        if self.state == TransportState::Closed {
            return Ok(());
        }
        self.mark_closed();
        self.stream.shutdown().await?;
        Ok(())
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}
