//! Command/response correlation over one server session.
//!
//! SMP is not pipelined here: a command is written and the caller waits for
//! the response carrying the same correlation id. Transmissions without a
//! correlation id are server pushes (`MSG`, `END`); they are queued and
//! handed out by [`SmpConnection::next_push`].

use crate::error::{QueueError, Result};
use crate::transmission::{
    CORR_ID_LEN, Command, ResponseTransmission, ServerMessage, build_transmission,
    parse_response_block,
};
use smp_crypto::random::random_array;
use smp_crypto::signatures::SigningKey;
use smp_transport::{BlockRead, BlockTransport};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// One authenticated session with an SMP server
pub struct SmpConnection {
    transport: Box<dyn BlockTransport>,
    host: String,
    port: u16,
    command_timeout: Duration,
    pushes: VecDeque<ResponseTransmission>,
}

impl SmpConnection {
    /// Wrap a connected transport.
    #[must_use]
    pub fn new(
        transport: Box<dyn BlockTransport>,
        host: impl Into<String>,
        port: u16,
        command_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            host: host.into(),
            port,
            command_timeout,
            pushes: VecDeque::new(),
        }
    }

    /// Server host name
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Server port
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Key hash of the server certificate
    #[must_use]
    pub fn server_key_hash(&self) -> [u8; 32] {
        self.transport.server_key_hash()
    }

    /// Session identifier bound into every signature
    #[must_use]
    pub fn session_id(&self) -> &[u8] {
        self.transport.session_id()
    }

    /// Send one command and wait for its response.
    ///
    /// Pushes that arrive while waiting are queued for [`next_push`].
    ///
    /// [`next_push`]: SmpConnection::next_push
    ///
    /// # Errors
    ///
    /// - [`QueueError::Timeout`] if no matching response arrives in time
    /// - [`QueueError::SignatureInvalid`] if signing fails its self-check
    /// - transport and parse errors from the session
    pub async fn send_command(
        &mut self,
        entity_id: &[u8],
        command: &Command<'_>,
        signer: Option<&SigningKey>,
    ) -> Result<ServerMessage> {
        let corr_id: [u8; CORR_ID_LEN] = random_array()?;
        let tx = build_transmission(self.transport.session_id(), &corr_id, entity_id, command, signer)?;
        tracing::trace!("Sending {} ({} byte transmission)", command.name(), tx.len());
        self.transport.write_command_block(&tx).await?;

        let deadline = Instant::now() + self.command_timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(QueueError::Timeout(command.name()).into());
            }
            let content = match self.transport.read_block(deadline - now).await? {
                BlockRead::Block(content) => content,
                BlockRead::Idle | BlockRead::Partial(_) => continue,
            };

            let mut response = None;
            for tx in parse_response_block(&content)? {
                if response.is_none() && tx.corr_id == corr_id {
                    response = Some(tx.message);
                } else if tx.corr_id.is_empty() {
                    self.pushes.push_back(tx);
                } else {
                    tracing::debug!("Dropping stale {} response", tx.message.name());
                }
            }
            if let Some(message) = response {
                tracing::trace!("{} -> {}", command.name(), message.name());
                return Ok(message);
            }
        }
    }

    /// Wait up to `timeout` for a server push.
    ///
    /// Returns `Ok(None)` when nothing arrived; that is normal idle waiting.
    ///
    /// # Errors
    ///
    /// Returns transport errors (a closed connection is fatal) and parse errors.
    pub async fn next_push(&mut self, timeout: Duration) -> Result<Option<ResponseTransmission>> {
        if let Some(push) = self.pushes.pop_front() {
            return Ok(Some(push));
        }
        match self.transport.read_block(timeout).await? {
            BlockRead::Block(content) => {
                self.pushes.extend(parse_response_block(&content)?);
                Ok(self.pushes.pop_front())
            }
            BlockRead::Idle | BlockRead::Partial(_) => Ok(None),
        }
    }

    /// Queue a push that arrived as a command response (a pending `MSG`
    /// answering `SUB` or `ACK`).
    pub fn defer_push(&mut self, push: ResponseTransmission) {
        self.pushes.push_back(push);
    }

    /// Close the session.
    ///
    /// # Errors
    ///
    /// Returns transport errors from shutting down the stream.
    pub async fn close(&mut self) -> Result<()> {
        self.transport.close().await?;
        Ok(())
    }
}

impl std::fmt::Debug for SmpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmpConnection")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("pending_pushes", &self.pushes.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Scripted in-memory transport for unit tests.

    use crate::transmission::encode_response_block;
    use async_trait::async_trait;
    use smp_transport::{BlockRead, BlockTransport, TransportError, TransportResult};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    pub const SESSION_ID: [u8; 32] = [0x42; 32];

    /// Replies to each written command with the next scripted response,
    /// copying the command's correlation id.
    #[derive(Clone, Default)]
    pub struct ScriptedTransport {
        pub replies: Arc<Mutex<VecDeque<Vec<u8>>>>,
        pub pushes: Arc<Mutex<VecDeque<Vec<u8>>>>,
        pub written: Arc<Mutex<Vec<Vec<u8>>>>,
        inbox: Arc<Mutex<VecDeque<Vec<u8>>>>,
    }

    impl ScriptedTransport {
        pub fn reply(&self, command: &[u8]) {
            self.replies.lock().unwrap().push_back(command.to_vec());
        }

        pub fn push(&self, block: Vec<u8>) {
            self.pushes.lock().unwrap().push_back(block);
        }
    }

    fn corr_and_entity(tx: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut pos = 1 + tx[0] as usize;
        pos += 1 + tx[pos] as usize;
        let corr_len = tx[pos] as usize;
        let corr = tx[pos + 1..pos + 1 + corr_len].to_vec();
        pos += 1 + corr_len;
        let ent_len = tx[pos] as usize;
        (corr, tx[pos + 1..pos + 1 + ent_len].to_vec())
    }

    #[async_trait]
    impl BlockTransport for ScriptedTransport {
        async fn read_block(&mut self, timeout: Duration) -> TransportResult<BlockRead> {
            let next = self.pushes.lock().unwrap().pop_front();
            let next = next.or_else(|| self.inbox.lock().unwrap().pop_front());
            match next {
                Some(block) => Ok(BlockRead::Block(block)),
                None => {
                    tokio::time::sleep(timeout.min(Duration::from_millis(5))).await;
                    Ok(BlockRead::Idle)
                }
            }
        }

        async fn write_block(&mut self, content: &[u8]) -> TransportResult<()> {
            let tx = content[3..].to_vec();
            self.written.lock().unwrap().push(tx.clone());
            let Some(reply) = self.replies.lock().unwrap().pop_front() else {
                return Ok(());
            };
            let (corr, entity) = corr_and_entity(&tx);
            let block = encode_response_block(&SESSION_ID, &[(&corr, &entity, reply)])
                .map_err(|e| TransportError::InvalidHandshake(e.to_string()))?;
            self.inbox.lock().unwrap().push_back(block);
            Ok(())
        }

        fn session_id(&self) -> &[u8] {
            &SESSION_ID
        }

        fn server_key_hash(&self) -> [u8; 32] {
            [0x77; 32]
        }

        async fn close(&mut self) -> TransportResult<()> {
            Ok(())
        }
    }
}
