//! Client orchestration.
//!
//! [`SmpClient`] owns one session to our own server (reply queue and contact
//! queues) and one session per peer server we write to. The sessions are
//! independent; all mutation goes through `&mut self`, except the contact
//! table which is shared behind a mutex so a UI can read it concurrently.

use crate::agent::envelope::{Confirmation, Profile};
use crate::agent::handshake::{AgentConnection, HandshakeState, InvitationKeys};
use crate::agent::hello::AgentBody;
use crate::config::ClientConfig;
use crate::connection::SmpConnection;
use crate::contact::ContactStore;
use crate::error::{HandshakeError, QueueError, Result};
use crate::invitation::{LinkStyle, PendingPeer, invitation_link, parse_invitation, queue_uri};
use crate::parser::{IncomingMessage, parse_incoming};
use crate::queue::QueueRecord;
use crate::storage::ContactStorage;
use crate::transmission::ServerMessage;
use smp_crypto::x25519;
use smp_transport::Connector;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Something the receive loop observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A peer joined our invitation; our HELLO is on its way
    ConfirmationAccepted {
        /// Peer display name
        peer: String,
    },
    /// Peer HELLO received
    Connected {
        /// Peer display name
        peer: String,
    },
    /// Text message
    Message {
        /// Peer display name
        peer: String,
        /// Sender's agent message id
        msg_id: u64,
        /// Text
        text: String,
    },
    /// Invitation received and left for the user to accept
    Invitation(PendingPeer),
    /// Invitation received and joined automatically
    JoinedInvitation {
        /// Peer name
        peer: String,
    },
    /// Server ended a subscription (another client subscribed)
    SubscriptionEnded {
        /// Recipient id of the queue
        entity_id: Vec<u8>,
    },
    /// A message arrived but handling it failed
    HandshakeFailed {
        /// Reason
        reason: String,
    },
    /// A message arrived that we could not interpret
    Unrecognized,
}

/// Snapshot for status displays
#[derive(Debug, Clone)]
pub struct ClientStatus {
    /// Our server as `host:port`
    pub server: String,
    /// Session to our server is open
    pub home_connected: bool,
    /// Reply queue exists
    pub has_reply_queue: bool,
    /// Invitation awaiting a confirmation
    pub invitation_pending: bool,
    /// Sessions to peer servers
    pub peer_servers: usize,
    /// Peer connections and their handshake states
    pub connections: Vec<(String, HandshakeState)>,
    /// Active contacts
    pub contacts: usize,
}

/// SMP client
pub struct SmpClient {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    storage: Arc<dyn ContactStorage>,
    contacts: Arc<Mutex<ContactStore>>,
    home: Option<SmpConnection>,
    peer_servers: HashMap<String, SmpConnection>,
    reply_queue: Option<QueueRecord>,
    invitation_keys: Option<InvitationKeys>,
    connections: Vec<AgentConnection>,
}

/// An all-zero key hash means "not pinned".
fn pinned(key_hash: [u8; 32]) -> Option<[u8; 32]> {
    (key_hash != [0; 32]).then_some(key_hash)
}

async fn peer_server<'a>(
    servers: &'a mut HashMap<String, SmpConnection>,
    connector: &dyn Connector,
    host: &str,
    port: u16,
    key_hash: [u8; 32],
    command_timeout: Duration,
) -> Result<&'a mut SmpConnection> {
    match servers.entry(format!("{host}:{port}")) {
        Entry::Occupied(entry) => Ok(entry.into_mut()),
        Entry::Vacant(entry) => {
            let transport = connector.connect(host, port, pinned(key_hash)).await?;
            tracing::info!("Connected to peer server {}:{}", host, port);
            Ok(entry.insert(SmpConnection::new(transport, host, port, command_timeout)))
        }
    }
}

impl SmpClient {
    /// Create a client and load persisted contacts.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::InvalidConfig`] for an invalid configuration
    /// - storage errors if the contact table exists but cannot be read
    pub fn new(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        storage: Arc<dyn ContactStorage>,
    ) -> Result<Self> {
        config.validate()?;
        let contacts = match storage.load_contacts(&config.namespace)? {
            Some(table) => ContactStore::from_table(table),
            None => ContactStore::new(),
        };
        tracing::debug!("Loaded {} contacts", contacts.num_contacts());
        Ok(Self {
            config,
            connector,
            storage,
            contacts: Arc::new(Mutex::new(contacts)),
            home: None,
            peer_servers: HashMap::new(),
            reply_queue: None,
            invitation_keys: None,
            connections: Vec::new(),
        })
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Shared contact table
    #[must_use]
    pub fn contacts(&self) -> Arc<Mutex<ContactStore>> {
        Arc::clone(&self.contacts)
    }

    /// Our reply queue, once created
    #[must_use]
    pub fn reply_queue(&self) -> Option<&QueueRecord> {
        self.reply_queue.as_ref()
    }

    /// Peer connections
    #[must_use]
    pub fn connections(&self) -> &[AgentConnection] {
        &self.connections
    }

    /// Name for a new connection, suffixed when already taken.
    fn unique_name(&self, base: &str) -> String {
        let taken = |name: &str| self.connections.iter().any(|c| c.peer_name() == name);
        if !taken(base) {
            return base.to_string();
        }
        (2..)
            .map(|n| format!("{base}#{n}"))
            .find(|name| !taken(name))
            .unwrap_or_else(|| base.to_string())
    }

    fn profile(&self) -> Profile {
        Profile {
            display_name: self.config.display_name.clone(),
            full_name: String::new(),
        }
    }

    /// Open the session to our server if needed.
    ///
    /// # Errors
    ///
    /// Returns transport errors, including `KeyHashMismatch` for a pinned
    /// server whose certificate does not match.
    pub async fn connect_home(&mut self) -> Result<&mut SmpConnection> {
        let conn = match self.home.take() {
            Some(conn) => conn,
            None => {
                let server = &self.config.server;
                let transport = self
                    .connector
                    .connect(&server.host, server.port, pinned(server.key_hash))
                    .await?;
                tracing::info!("Connected to {}:{}", server.host, server.port);
                SmpConnection::new(transport, &server.host, server.port, self.config.timeouts.command)
            }
        };
        Ok(self.home.insert(conn))
    }

    /// Create the reply queue with `NEW` (subscribed on creation) if needed.
    ///
    /// # Errors
    ///
    /// Returns connection and queue creation errors.
    pub async fn ensure_reply_queue(&mut self) -> Result<&QueueRecord> {
        if self.reply_queue.is_none() {
            let home = self.connect_home().await?;
            let queue = QueueRecord::create(home).await?;
            self.reply_queue = Some(queue);
        }
        self.reply_queue
            .as_ref()
            .ok_or_else(|| QueueError::NotEstablished.into())
    }

    /// Create an invitation link for our reply queue with fresh X3DH keys.
    /// A previous unanswered invitation is replaced.
    ///
    /// # Errors
    ///
    /// Returns connection, queue and encoding errors.
    pub async fn create_invitation(&mut self, style: LinkStyle) -> Result<String> {
        let info = self.ensure_reply_queue().await?.info();
        let keys = InvitationKeys::generate()?;
        let (key1, key2) = keys.public_keys()?;
        let link = invitation_link(&queue_uri(&info)?, Some((&key1, &key2)), style)?;
        self.invitation_keys = Some(keys);
        tracing::info!("Invitation created for queue on {}:{}", info.host, info.port);
        Ok(link)
    }

    /// Join the queue of an invitation link and run the handshake.
    /// Returns the peer's name.
    ///
    /// # Errors
    ///
    /// - parse errors for an unusable link
    /// - handshake, connection and queue errors
    pub async fn join(&mut self, link: &str) -> Result<String> {
        let peer = parse_invitation(link)?;
        self.join_peer(&peer).await
    }

    /// Join a parsed invitation.
    ///
    /// # Errors
    ///
    /// See [`SmpClient::join`].
    pub async fn join_peer(&mut self, peer: &PendingPeer) -> Result<String> {
        let reply_info = self.ensure_reply_queue().await?.info();
        let mut connection = AgentConnection::join(peer)?;
        connection.set_peer_name(self.unique_name(&peer.host));
        let profile = self.profile();
        let server = peer_server(
            &mut self.peer_servers,
            self.connector.as_ref(),
            &peer.host,
            peer.port,
            peer.key_hash,
            self.config.timeouts.command,
        )
        .await?;

        connection.send_confirmation(server, &reply_info, &profile).await?;
        if self.config.secure_peer_queue {
            connection.secure_queue(server).await?;
        }
        connection.send_hello(server).await?;
        if self.config.optimistic_handshake {
            connection.mark_connected()?;
        }

        let name = connection.peer_name().to_string();
        self.connections.push(connection);
        Ok(name)
    }

    /// Send a text message to a connected peer.
    ///
    /// # Errors
    ///
    /// - [`HandshakeError::UnknownPeer`] if no connection has that name
    /// - [`HandshakeError::NotReady`] before the handshake completed
    pub async fn send_text(&mut self, peer: &str, text: &str) -> Result<()> {
        let index = self
            .connections
            .iter()
            .position(|c| c.peer_name() == peer)
            .ok_or_else(|| HandshakeError::UnknownPeer(peer.to_string()))?;
        let queue = self.connections[index].peer_queue().clone();
        let server = peer_server(
            &mut self.peer_servers,
            self.connector.as_ref(),
            &queue.host,
            queue.port,
            queue.key_hash,
            self.config.timeouts.command,
        )
        .await?;
        self.connections[index].send_text(server, text).await
    }

    /// Wait up to `timeout` for the next event on our server.
    ///
    /// `Ok(None)` means nothing arrived. Every delivered message is
    /// acknowledged, whether or not it could be interpreted.
    ///
    /// # Errors
    ///
    /// - [`QueueError::NotEstablished`] before [`SmpClient::connect_home`]
    /// - transport errors (a closed session is fatal)
    /// - `ACK` failures
    pub async fn poll(&mut self, timeout: Duration) -> Result<Option<ClientEvent>> {
        let home = self.home.as_mut().ok_or(QueueError::NotEstablished)?;
        let Some(push) = home.next_push(timeout).await? else {
            return Ok(None);
        };
        match push.message {
            ServerMessage::Msg { msg_id, body } => {
                self.handle_delivery(&push.entity_id, &msg_id, &body).await.map(Some)
            }
            ServerMessage::End => {
                tracing::warn!("Subscription ended for queue {}", hex::encode(&push.entity_id));
                Ok(Some(ClientEvent::SubscriptionEnded {
                    entity_id: push.entity_id,
                }))
            }
            other => {
                tracing::debug!("Ignoring unsolicited {}", other.name());
                Ok(Some(ClientEvent::Unrecognized))
            }
        }
    }

    async fn queue_for(&self, recipient_id: &[u8]) -> Option<QueueRecord> {
        if let Some(queue) = self.reply_queue.as_ref().filter(|q| q.recipient_id == recipient_id) {
            return Some(queue.clone());
        }
        self.contacts
            .lock()
            .await
            .active()
            .filter_map(|contact| contact.queue.as_ref())
            .find(|queue| queue.recipient_id == recipient_id)
            .cloned()
    }

    async fn handle_delivery(&mut self, recipient_id: &[u8], msg_id: &[u8], body: &[u8]) -> Result<ClientEvent> {
        let Some(queue) = self.queue_for(recipient_id).await else {
            tracing::warn!("Message for unknown queue {}", hex::encode(recipient_id));
            return Ok(ClientEvent::Unrecognized);
        };

        let event = match queue.decrypt_message(msg_id, body) {
            Ok(plaintext) => {
                let incoming = parse_incoming(&plaintext, &queue.dh_private());
                self.handle_incoming(incoming).await.unwrap_or_else(|e| {
                    tracing::warn!("Handling message failed: {}", e);
                    ClientEvent::HandshakeFailed {
                        reason: e.to_string(),
                    }
                })
            }
            Err(e) => {
                tracing::warn!("Server envelope did not decrypt: {}", e);
                ClientEvent::Unrecognized
            }
        };

        let home = self.home.as_mut().ok_or(QueueError::NotEstablished)?;
        queue.ack(home, msg_id).await?;
        Ok(event)
    }

    async fn handle_incoming(&mut self, incoming: IncomingMessage) -> Result<ClientEvent> {
        match incoming {
            IncomingMessage::Confirmation { sender_dh, body } => self.accept_confirmation(sender_dh, &body).await,
            IncomingMessage::AgentMessage { sender_dh, envelope } => self.receive_agent_message(sender_dh, &envelope),
            IncomingMessage::Invitation(peer) if self.config.auto_accept_invitations && peer.is_complete() => {
                let peer = self.join_peer(&peer).await?;
                Ok(ClientEvent::JoinedInvitation { peer })
            }
            IncomingMessage::Invitation(peer) => Ok(ClientEvent::Invitation(peer)),
            IncomingMessage::Unknown => Ok(ClientEvent::Unrecognized),
        }
    }

    async fn accept_confirmation(&mut self, sender_dh: x25519::PublicKey, body: &[u8]) -> Result<ClientEvent> {
        let keys = self
            .invitation_keys
            .as_ref()
            .ok_or_else(|| HandshakeError::ConfirmationRejected("no pending invitation".to_string()))?;
        let confirmation = Confirmation::decode(body)?;
        let (mut connection, reply) = AgentConnection::accept(&confirmation, sender_dh, keys)?;
        self.invitation_keys = None;
        connection.set_peer_name(self.unique_name(connection.peer_name()));
        tracing::info!("Confirmation from {:?}", connection.peer_name());

        let server = peer_server(
            &mut self.peer_servers,
            self.connector.as_ref(),
            &reply.queue.host,
            reply.queue.port,
            reply.queue.key_hash,
            self.config.timeouts.command,
        )
        .await?;
        connection.send_hello(server).await?;
        if self.config.optimistic_handshake {
            connection.mark_connected()?;
        }

        let peer = connection.peer_name().to_string();
        self.connections.push(connection);
        Ok(ClientEvent::ConfirmationAccepted { peer })
    }

    fn receive_agent_message(&mut self, sender_dh: x25519::PublicKey, envelope: &[u8]) -> Result<ClientEvent> {
        let known = self
            .connections
            .iter()
            .position(|c| c.peer_conn_dh() == Some(&sender_dh));
        let candidates: Vec<usize> = match known {
            Some(index) => vec![index],
            None => (0..self.connections.len())
                .filter(|&i| self.connections[i].peer_conn_dh().is_none())
                .collect(),
        };

        for index in candidates {
            let connection = &mut self.connections[index];
            match connection.receive(envelope, sender_dh) {
                Ok(message) => {
                    let peer = connection.peer_name().to_string();
                    return Ok(match message.body {
                        AgentBody::Hello => ClientEvent::Connected { peer },
                        AgentBody::Text(text) => ClientEvent::Message {
                            peer,
                            msg_id: message.msg_id,
                            text,
                        },
                    });
                }
                Err(e) => tracing::debug!("Connection {} did not decrypt: {}", index, e),
            }
        }
        Err(HandshakeError::UnknownPeer("no connection decrypts this message".to_string()).into())
    }

    /// Create a contact queue on our server and persist the table.
    ///
    /// # Errors
    ///
    /// Returns `CapacityExceeded`, queue creation and storage errors.
    pub async fn add_contact(&mut self, name: &str) -> Result<usize> {
        let contacts = Arc::clone(&self.contacts);
        let storage = Arc::clone(&self.storage);
        let namespace = self.config.namespace.clone();
        let home = self.connect_home().await?;

        let mut store = contacts.lock().await;
        let index = store.add_contact(home, name).await?;
        storage.save_contacts(&namespace, &store.to_table())?;
        Ok(index)
    }

    /// Delete a contact's queue and persist the table.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `DEL` and storage errors.
    pub async fn remove_contact(&mut self, name: &str) -> Result<()> {
        let contacts = Arc::clone(&self.contacts);
        let storage = Arc::clone(&self.storage);
        let namespace = self.config.namespace.clone();
        let home = self.connect_home().await?;

        let mut store = contacts.lock().await;
        store.remove_contact(home, name).await?;
        storage.save_contacts(&namespace, &store.to_table())?;
        Ok(())
    }

    /// Names of active contacts
    pub async fn contact_names(&self) -> Vec<String> {
        self.contacts
            .lock()
            .await
            .active()
            .map(|contact| contact.name.clone())
            .collect()
    }

    /// Forget every contact locally and erase the stored table. Queues
    /// are deleted on the server when a session is open; failures there
    /// are logged.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub async fn clear_contacts(&mut self) -> Result<()> {
        let mut store = self.contacts.lock().await;
        if let Some(home) = self.home.as_mut() {
            for contact in store.active() {
                if let Some(queue) = &contact.queue {
                    if let Err(e) = queue.delete(home).await {
                        tracing::warn!("DEL for {:?} failed: {}", contact.name, e);
                    }
                }
            }
        }
        store.clear_all();
        self.storage.erase_all_contacts(&self.config.namespace)?;
        tracing::info!("Contacts cleared");
        Ok(())
    }

    /// Subscribe the reply queue and every contact queue. Best-effort;
    /// returns the number of successful subscriptions.
    ///
    /// # Errors
    ///
    /// Returns connection errors only.
    pub async fn subscribe_all(&mut self) -> Result<usize> {
        let contacts = Arc::clone(&self.contacts);
        let reply = self.reply_queue.clone();
        let home = self.connect_home().await?;
        let store = contacts.lock().await;
        Ok(store.subscribe_all(home, reply.as_ref()).await)
    }

    /// Status snapshot
    pub async fn status(&self) -> ClientStatus {
        ClientStatus {
            server: format!("{}:{}", self.config.server.host, self.config.server.port),
            home_connected: self.home.is_some(),
            has_reply_queue: self.reply_queue.is_some(),
            invitation_pending: self.invitation_keys.is_some(),
            peer_servers: self.peer_servers.len(),
            connections: self
                .connections
                .iter()
                .map(|c| (c.peer_name().to_string(), c.state()))
                .collect(),
            contacts: self.contacts.lock().await.num_contacts(),
        }
    }

    /// Close every session. Ratchets and queue keys are dropped and zeroed.
    ///
    /// # Errors
    ///
    /// Returns the first close failure; all sessions are still dropped.
    pub async fn close(&mut self) -> Result<()> {
        let mut result = Ok(());
        for (_, mut conn) in self.peer_servers.drain() {
            if let Err(e) = conn.close().await {
                result = result.and(Err(e));
            }
        }
        if let Some(mut home) = self.home.take() {
            if let Err(e) = home.close().await {
                result = result.and(Err(e));
            }
        }
        self.connections.clear();
        self.reply_queue = None;
        self.invitation_keys = None;
        tracing::info!("Client closed");
        result
    }
}

impl std::fmt::Debug for SmpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmpClient")
            .field("server", &self.config.server.to_string())
            .field("home", &self.home)
            .field("peer_servers", &self.peer_servers.len())
            .field("connections", &self.connections)
            .finish_non_exhaustive()
    }
}
