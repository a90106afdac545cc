//! In-process SMP server for integration tests
//!
//! Speaks just enough SMP over `tokio::io::duplex` streams to run complete
//! client flows: the hello exchange, `NEW` (subscribed on creation), `SUB`,
//! `SEND` with server-side encryption of delivered messages, `SKEY`, `ACK`
//! and `DEL`. One message per queue is in flight until it is acknowledged,
//! like a real server.
//!
//! # Example
//!
//! ```no_run
//! use smp_integration_tests::fixtures::MockServer;
//! use std::sync::Arc;
//!
//! let server = MockServer::new();
//! let connector = Arc::new(server.connector());
//! // hand `connector` to SmpClient::new(...)
//! ```

use async_trait::async_trait;
use rand_core::OsRng;
use smp_core::encoding::{Reader, push_len_prefixed};
use smp_core::transmission::encode_response_block;
use smp_crypto::hash::sha256;
use smp_crypto::random::random_array;
use smp_crypto::signatures::{Signature, VerifyingKey};
use smp_crypto::{nacl_box, x25519};
use smp_transport::block::{BLOCK_SIZE, decode_block, encode_block};
use smp_transport::handshake::ServerHello;
use smp_transport::{BlockTransport, Connector, SmpSession, TransportError, TransportResult};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

/// Certificate bytes announced in the server hello
pub const MOCK_CERTIFICATE: &[u8] = b"mock smp server certificate";

/// Size the server pads delivered plaintext to
const DELIVERY_PADDED_LEN: usize = 16100;

/// Key hash clients derive for the mock server
#[must_use]
pub fn mock_key_hash() -> [u8; 32] {
    sha256(MOCK_CERTIFICATE)
}

type ConnectionId = u64;

/// A command the server has processed, for assertions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRecord {
    /// Command mnemonic
    pub command: String,
    /// Whether the transmission carried a signature
    pub signed: bool,
}

struct Queue {
    recipient_id: Vec<u8>,
    sender_id: Vec<u8>,
    recipient_key: VerifyingKey,
    recipient_dh: x25519::PublicKey,
    server_dh: x25519::PrivateKey,
    sender_key: Option<VerifyingKey>,
    subscriber: Option<ConnectionId>,
    messages: VecDeque<(Vec<u8>, Vec<u8>)>,
    delivered: bool,
}

impl Queue {
    /// Encrypt a message body for the recipient: `[len][ts]T <body>` padded.
    fn seal(&self, msg_id: &[u8], body: &[u8]) -> Vec<u8> {
        let mut inner = 0u64.to_be_bytes().to_vec();
        inner.extend_from_slice(b"T ");
        inner.extend_from_slice(body);
        let mut plaintext = (inner.len() as u16).to_be_bytes().to_vec();
        plaintext.extend_from_slice(&inner);
        if plaintext.len() < DELIVERY_PADDED_LEN {
            plaintext.resize(DELIVERY_PADDED_LEN, b'#');
        }
        let nonce = nacl_box::nonce_from_id(msg_id).expect("message ids are 24 bytes");
        nacl_box::seal(&plaintext, &nonce, &self.recipient_dh, &self.server_dh).expect("box seal")
    }
}

#[derive(Default)]
struct ServerState {
    queues: Vec<Queue>,
    connections: HashMap<ConnectionId, mpsc::UnboundedSender<Vec<u8>>>,
    log: Vec<CommandRecord>,
    rejected_sends: usize,
}

impl ServerState {
    fn by_recipient(&mut self, id: &[u8]) -> Option<&mut Queue> {
        self.queues.iter_mut().find(|q| q.recipient_id == id)
    }

    fn by_sender(&mut self, id: &[u8]) -> Option<&mut Queue> {
        self.queues.iter_mut().find(|q| q.sender_id == id)
    }

    fn push(&self, conn: ConnectionId, session_id: &[u8], entity_id: &[u8], command: Vec<u8>) {
        if let Some(tx) = self.connections.get(&conn) {
            let content = encode_response_block(session_id, &[(&[][..], entity_id, command)])
                .expect("response fits");
            let _ = tx.send(content);
        }
    }

    /// Deliver the head of a queue to its subscriber if nothing is in flight.
    fn deliver(&mut self, recipient_id: &[u8], sessions: &HashMap<ConnectionId, Vec<u8>>) {
        let Some(queue) = self.queues.iter_mut().find(|q| q.recipient_id == recipient_id) else {
            return;
        };
        if queue.delivered {
            return;
        }
        let (Some(subscriber), Some((msg_id, body))) = (queue.subscriber, queue.messages.front()) else {
            return;
        };
        let mut command = b"MSG ".to_vec();
        push_len_prefixed(&mut command, msg_id).expect("short id");
        command.extend_from_slice(&queue.seal(msg_id, body));
        queue.delivered = true;
        let recipient_id = queue.recipient_id.clone();
        let session = sessions.get(&subscriber).cloned().unwrap_or_default();
        self.push(subscriber, &session, &recipient_id, command);
    }
}

/// Shared mock server; every connection sees the same queues.
#[derive(Clone, Default)]
pub struct MockServer {
    state: Arc<Mutex<ServerState>>,
    sessions: Arc<Mutex<HashMap<ConnectionId, Vec<u8>>>>,
    next_id: Arc<AtomicU64>,
}

impl MockServer {
    /// Empty server
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connector opening sessions to this server for any host
    #[must_use]
    pub fn connector(&self) -> MockConnector {
        MockConnector {
            server: self.clone(),
            hosts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of queues
    #[must_use]
    pub fn queue_count(&self) -> usize {
        self.state().queues.len()
    }

    /// Number of queues secured with `SKEY`
    #[must_use]
    pub fn secured_queue_count(&self) -> usize {
        self.state().queues.iter().filter(|q| q.sender_key.is_some()).count()
    }

    /// Commands processed so far
    #[must_use]
    pub fn command_log(&self) -> Vec<CommandRecord> {
        self.state().log.clone()
    }

    /// `SEND`s rejected for a missing or bad signature
    #[must_use]
    pub fn rejected_sends(&self) -> usize {
        self.state().rejected_sends
    }

    /// Number of open connections
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.state().connections.len()
    }

    /// Serve one client stream until it closes.
    async fn serve(self, stream: DuplexStream) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let session_id: [u8; 32] = random_array().expect("random session id");
        let (mut reader, mut writer) = tokio::io::split(stream);
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let hello = ServerHello {
            min_version: 6,
            max_version: 7,
            session_id: session_id.to_vec(),
            cert_chain: vec![MOCK_CERTIFICATE.to_vec()],
        };
        let _ = tx.send(hello.encode());
        self.state().connections.insert(id, tx.clone());
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, session_id.to_vec());

        let write_task = tokio::spawn(async move {
            while let Some(content) = rx.recv().await {
                let Ok(block) = encode_block(&content) else { break };
                if writer.write_all(&block).await.is_err() {
                    break;
                }
            }
        });

        let mut block = vec![0u8; BLOCK_SIZE];
        // Client hello
        if reader.read_exact(&mut block).await.is_ok() {
            while reader.read_exact(&mut block).await.is_ok() {
                let Ok(content) = decode_block(&block) else { break };
                self.handle_block(id, &session_id, content);
            }
        }

        self.state().connections.remove(&id);
        for queue in &mut self.state().queues {
            if queue.subscriber == Some(id) {
                queue.subscriber = None;
            }
        }
        drop(tx);
        let _ = write_task.await;
    }

    fn handle_block(&self, conn: ConnectionId, session_id: &[u8], content: &[u8]) {
        let mut reader = Reader::new(content);
        let Ok(count) = reader.read_u8() else { return };
        for _ in 0..count {
            let Ok(len) = reader.read_u16() else { return };
            let Ok(tx) = reader.read_bytes(len as usize) else { return };
            self.handle_transmission(conn, session_id, tx);
        }
    }

    fn handle_transmission(&self, conn: ConnectionId, session_id: &[u8], tx: &[u8]) {
        let mut reader = Reader::new(tx);
        let Ok(signature) = reader.read_short_field() else { return };
        let signed = &tx[reader.position()..];
        let (Ok(_session), Ok(corr_id), Ok(entity_id)) =
            (reader.read_short_field(), reader.read_short_field(), reader.read_short_field())
        else {
            return;
        };
        let command = reader.read_rest();
        let signature = Signature::from_slice(signature).ok();
        let verified_by = |key: &VerifyingKey| signature.as_ref().is_some_and(|s| key.verify(signed, s).is_ok());

        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let mut state = self.state();
        let name = command
            .iter()
            .position(|&b| b == b' ')
            .map_or(command, |end| &command[..end]);
        state.log.push(CommandRecord {
            command: String::from_utf8_lossy(name).into_owned(),
            signed: signature.is_some(),
        });

        let mut after = None;
        let response: Vec<u8> = if let Some(rest) = command.strip_prefix(b"NEW ") {
            let mut args = Reader::new(rest);
            let keys = args.read_short_field().ok().zip(args.read_short_field().ok());
            let parsed = keys.and_then(|(auth, dh)| {
                let auth = VerifyingKey::from_spki(auth).ok()?;
                let dh = x25519::PublicKey::from_spki(dh).ok()?;
                Some((auth, dh))
            });
            match parsed {
                Some((auth, dh)) if verified_by(&auth) => {
                    let queue = Queue {
                        recipient_id: random_array::<24>().expect("random id").to_vec(),
                        sender_id: random_array::<24>().expect("random id").to_vec(),
                        recipient_key: auth,
                        recipient_dh: dh,
                        server_dh: x25519::PrivateKey::generate(&mut OsRng),
                        sender_key: None,
                        subscriber: Some(conn),
                        messages: VecDeque::new(),
                        delivered: false,
                    };
                    let mut ids = b"IDS ".to_vec();
                    push_len_prefixed(&mut ids, &queue.recipient_id).expect("short id");
                    push_len_prefixed(&mut ids, &queue.sender_id).expect("short id");
                    push_len_prefixed(&mut ids, &queue.server_dh.public_key().to_spki()).expect("short key");
                    state.queues.push(queue);
                    ids
                }
                Some(_) => b"ERR AUTH".to_vec(),
                None => b"ERR CMD SYNTAX".to_vec(),
            }
        } else if command == b"SUB" {
            match state.by_recipient(entity_id) {
                Some(queue) if verified_by(&queue.recipient_key) => {
                    let previous = queue.subscriber.replace(conn);
                    queue.delivered = false;
                    if let Some(previous) = previous.filter(|&p| p != conn) {
                        let session = sessions.get(&previous).cloned().unwrap_or_default();
                        state.push(previous, &session, entity_id, b"END".to_vec());
                    }
                    after = Some(entity_id.to_vec());
                    b"OK".to_vec()
                }
                _ => b"ERR AUTH".to_vec(),
            }
        } else if let Some(rest) = command.strip_prefix(b"SEND ") {
            let body = rest.get(2..).unwrap_or_default();
            match state.by_sender(entity_id) {
                Some(queue) => {
                    let authorized = match &queue.sender_key {
                        Some(key) => verified_by(key),
                        None => true,
                    };
                    if authorized {
                        let msg_id = random_array::<24>().expect("random id").to_vec();
                        queue.messages.push_back((msg_id, body.to_vec()));
                        after = Some(queue.recipient_id.clone());
                        b"OK".to_vec()
                    } else {
                        state.rejected_sends += 1;
                        b"ERR AUTH".to_vec()
                    }
                }
                None => b"ERR AUTH".to_vec(),
            }
        } else if let Some(rest) = command.strip_prefix(b"SKEY ") {
            let key = Reader::new(rest)
                .read_short_field()
                .ok()
                .and_then(|spki| VerifyingKey::from_spki(spki).ok());
            match (state.by_sender(entity_id), key) {
                (Some(queue), Some(key)) if queue.sender_key.is_none() => {
                    queue.sender_key = Some(key);
                    b"OK".to_vec()
                }
                (Some(_), None) => b"ERR CMD SYNTAX".to_vec(),
                _ => b"ERR AUTH".to_vec(),
            }
        } else if let Some(rest) = command.strip_prefix(b"ACK ") {
            let msg_id = Reader::new(rest).read_short_field().unwrap_or_default().to_vec();
            match state.by_recipient(entity_id) {
                Some(queue) if verified_by(&queue.recipient_key) => {
                    if queue.messages.front().is_some_and(|(id, _)| *id == msg_id) {
                        queue.messages.pop_front();
                        queue.delivered = false;
                        after = Some(entity_id.to_vec());
                        b"OK".to_vec()
                    } else {
                        b"ERR NO_MSG".to_vec()
                    }
                }
                _ => b"ERR AUTH".to_vec(),
            }
        } else if command == b"DEL" {
            let position = state
                .queues
                .iter()
                .position(|q| q.recipient_id == entity_id && verified_by(&q.recipient_key));
            match position {
                Some(index) => {
                    state.queues.remove(index);
                    b"OK".to_vec()
                }
                None => b"ERR AUTH".to_vec(),
            }
        } else {
            b"ERR CMD UNKNOWN".to_vec()
        };

        if let Some(tx) = state.connections.get(&conn) {
            let content = encode_response_block(session_id, &[(corr_id, entity_id, response)])
                .expect("response fits");
            let _ = tx.send(content);
        }
        if let Some(recipient_id) = after {
            state.deliver(&recipient_id, &sessions);
        }
    }
}

/// [`Connector`] for a [`MockServer`]; records the hosts it was asked for.
#[derive(Clone)]
pub struct MockConnector {
    server: MockServer,
    hosts: Arc<Mutex<Vec<String>>>,
}

impl MockConnector {
    /// `host:port` of every connection opened, in order
    #[must_use]
    pub fn hosts(&self) -> Vec<String> {
        self.hosts.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        key_hash: Option<[u8; 32]>,
    ) -> TransportResult<Box<dyn BlockTransport>> {
        self.hosts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(format!("{host}:{port}"));
        let (client, server) = tokio::io::duplex(4 * BLOCK_SIZE);
        tokio::spawn(self.server.clone().serve(server));
        let session = SmpSession::handshake(client, key_hash, None, Duration::from_secs(5)).await?;
        Ok(Box::new(session))
    }
}

/// Connector whose every attempt fails, for error paths
#[derive(Debug, Clone, Copy, Default)]
pub struct RefusingConnector;

#[async_trait]
impl Connector for RefusingConnector {
    async fn connect(
        &self,
        host: &str,
        _port: u16,
        _key_hash: Option<[u8; 32]>,
    ) -> TransportResult<Box<dyn BlockTransport>> {
        Err(TransportError::DnsFailure(format!("{host}: refused by test connector")))
    }
}
