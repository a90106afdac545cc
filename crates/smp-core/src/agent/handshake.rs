//! Agent handshake state machine.
//!
//! Joining party:
//!
//! ```text
//! Idle -> ConfirmationSent -> [SkeySent] -> HelloSent -> (HelloReceived) -> Connected
//! ```
//!
//! Accepting party:
//!
//! ```text
//! Idle -> ConfirmationReceived -> HelloSent -> (HelloReceived) -> Connected
//! ```
//!
//! With the optimistic fast path the connection moves from `HelloSent`
//! straight to `Connected` without waiting for the peer's HELLO.

use crate::agent::envelope::{
    CONFIRMATION_PADDED_LEN, CONN_INFO_PADDED_LEN, ClientMessage, Confirmation, ConnInfoReply,
    HELLO_PADDED_LEN, Profile, decode_agent_envelope, encode_agent_envelope, pad_block,
};
use crate::agent::hello::{AgentBody, AgentMessage, MessageChain};
use crate::connection::SmpConnection;
use crate::error::{Error, HandshakeError, ParseError, QueueError, Result};
use crate::invitation::PendingPeer;
use crate::queue::{QUEUE_INFO_VERSION, QueueInfo};
use crate::transmission::{Command, ServerMessage};
use rand_core::OsRng;
use smp_crypto::hash::sha256;
use smp_crypto::ratchet::RatchetState;
use smp_crypto::signatures::SigningKey;
use smp_crypto::{x25519, x448};

/// Handshake state of one peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Nothing exchanged
    Idle,
    /// Our confirmation was accepted by the peer's server
    ConfirmationSent,
    /// Peer's confirmation decrypted
    ConfirmationReceived,
    /// Peer queue secured with our sender key
    SkeySent,
    /// Our HELLO was accepted by the peer's server
    HelloSent,
    /// Peer's HELLO decrypted
    HelloReceived,
    /// Ready for messages
    Connected,
}

impl HandshakeState {
    /// State name for logs and errors
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            HandshakeState::Idle => "Idle",
            HandshakeState::ConfirmationSent => "ConfirmationSent",
            HandshakeState::ConfirmationReceived => "ConfirmationReceived",
            HandshakeState::SkeySent => "SkeySent",
            HandshakeState::HelloSent => "HelloSent",
            HandshakeState::HelloReceived => "HelloReceived",
            HandshakeState::Connected => "Connected",
        }
    }
}

/// X448 keys announced in our invitation link
#[derive(Clone)]
pub struct InvitationKeys {
    key1: x448::PrivateKey,
    key2: x448::PrivateKey,
}

impl InvitationKeys {
    /// Fresh key pair.
    ///
    /// # Errors
    ///
    /// Returns a crypto error if the RNG fails.
    pub fn generate() -> Result<Self> {
        Ok(Self {
            key1: x448::PrivateKey::generate()?,
            key2: x448::PrivateKey::generate()?,
        })
    }

    /// Public halves for the `e2e` link parameter.
    ///
    /// # Errors
    ///
    /// Returns a crypto error if a key is invalid.
    pub fn public_keys(&self) -> Result<(x448::PublicKey, x448::PublicKey)> {
        Ok((self.key1.public_key()?, self.key2.public_key()?))
    }
}

impl std::fmt::Debug for InvitationKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvitationKeys").finish_non_exhaustive()
    }
}

/// One end-to-end connection with a peer
pub struct AgentConnection {
    state: HandshakeState,
    peer_name: String,
    ratchet: RatchetState,
    confirmation_keys: Option<(x448::PublicKey, x448::PublicKey)>,
    conn_dh: x25519::PrivateKey,
    peer_queue: QueueInfo,
    peer_conn_dh: Option<x25519::PublicKey>,
    sender_key: Option<SigningKey>,
    chain: MessageChain,
    last_peer_msg_id: u64,
    last_peer_hash: Option<[u8; 32]>,
}

impl AgentConnection {
    /// Prepare to join the queue of an invitation: run X3DH as the
    /// joining party and generate our connection DH key.
    ///
    /// # Errors
    ///
    /// - [`HandshakeError::NoPeerDhKey`] if the invitation has no `dh` key
    /// - [`HandshakeError::MissingRatchetKeys`] if it has no X3DH keys
    /// - ratchet errors for invalid peer keys
    pub fn join(peer: &PendingPeer) -> Result<Self> {
        let dh_public = peer.dh_public.ok_or(HandshakeError::NoPeerDhKey)?;
        let (peer_key1, peer_key2) = peer.ratchet_keys.ok_or(HandshakeError::MissingRatchetKeys)?;
        let key1 = x448::PrivateKey::generate()?;
        let key2 = x448::PrivateKey::generate()?;
        let ratchet = RatchetState::init_sender(&key1, &key2, &peer_key1, &peer_key2)?;

        Ok(Self {
            state: HandshakeState::Idle,
            peer_name: peer.host.clone(),
            ratchet,
            confirmation_keys: Some((key1.public_key()?, key2.public_key()?)),
            conn_dh: x25519::PrivateKey::generate(&mut OsRng),
            peer_queue: QueueInfo {
                version: QUEUE_INFO_VERSION,
                host: peer.host.clone(),
                port: peer.port,
                key_hash: peer.key_hash,
                sender_id: peer.queue_id.clone(),
                dh_public,
            },
            peer_conn_dh: None,
            sender_key: None,
            chain: MessageChain::new(),
            last_peer_msg_id: 0,
            last_peer_hash: None,
        })
    }

    /// Accept a confirmation that arrived on the queue of our invitation:
    /// run X3DH as the accepting party and decrypt the peer's connection info.
    ///
    /// # Errors
    ///
    /// - ratchet errors if X3DH or decryption fails
    /// - parse errors for malformed connection info
    pub fn accept(
        confirmation: &Confirmation,
        sender_dh: x25519::PublicKey,
        keys: &InvitationKeys,
    ) -> Result<(Self, ConnInfoReply)> {
        let (peer_key1, peer_key2) = &confirmation.ratchet_keys;
        let mut ratchet = RatchetState::init_receiver(&keys.key1, &keys.key2, peer_key1, peer_key2)?;
        let plaintext = ratchet.decrypt(&confirmation.encrypted_conn_info)?;
        let reply = ConnInfoReply::decode(&plaintext)?;

        let peer_name = if reply.profile.display_name.is_empty() {
            reply.queue.host.clone()
        } else {
            reply.profile.display_name.clone()
        };
        let mut connection = Self {
            state: HandshakeState::Idle,
            peer_name,
            ratchet,
            confirmation_keys: None,
            conn_dh: x25519::PrivateKey::generate(&mut OsRng),
            peer_queue: reply.queue.clone(),
            peer_conn_dh: Some(sender_dh),
            sender_key: None,
            chain: MessageChain::new(),
            last_peer_msg_id: 0,
            last_peer_hash: None,
        };
        connection.transition_to(HandshakeState::ConfirmationReceived)?;
        Ok((connection, reply))
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Peer display name, or its server host until the profile is known
    #[must_use]
    pub fn peer_name(&self) -> &str {
        &self.peer_name
    }

    /// Rename the peer
    pub fn set_peer_name(&mut self, name: impl Into<String>) {
        self.peer_name = name.into();
    }

    /// Queue we write to
    #[must_use]
    pub fn peer_queue(&self) -> &QueueInfo {
        &self.peer_queue
    }

    /// Peer's connection DH key, once a message from it was seen
    #[must_use]
    pub fn peer_conn_dh(&self) -> Option<&x25519::PublicKey> {
        self.peer_conn_dh.as_ref()
    }

    /// Our connection DH key
    #[must_use]
    pub fn conn_dh_public(&self) -> x25519::PublicKey {
        self.conn_dh.public_key()
    }

    /// Outgoing message chain
    #[must_use]
    pub fn chain(&self) -> &MessageChain {
        &self.chain
    }

    /// Whether messages can be exchanged
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == HandshakeState::Connected
    }

    /// Check if a state transition is valid
    #[must_use]
    pub fn can_transition(&self, to: HandshakeState) -> bool {
        use HandshakeState::{
            ConfirmationReceived, ConfirmationSent, Connected, HelloReceived, HelloSent, Idle,
            SkeySent,
        };
        matches!(
            (self.state, to),
            (Idle, ConfirmationSent | ConfirmationReceived)
                | (ConfirmationSent, SkeySent | HelloSent)
                | (SkeySent | ConfirmationReceived, HelloSent)
                | (HelloSent, HelloReceived | Connected)
                | (HelloReceived, Connected)
        )
    }

    /// Transition to a new state
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::InvalidTransition`] if the transition is
    /// not allowed from the current state.
    pub fn transition_to(&mut self, new_state: HandshakeState) -> std::result::Result<(), HandshakeError> {
        if !self.can_transition(new_state) {
            return Err(HandshakeError::InvalidTransition {
                from: self.state.name(),
                to: new_state.name(),
            });
        }
        let old_state = self.state;
        self.state = new_state;
        tracing::debug!(
            "Handshake state transition: {:?} -> {:?}",
            old_state,
            new_state
        );
        Ok(())
    }

    fn ensure_transition(&self, to: HandshakeState) -> std::result::Result<(), HandshakeError> {
        if self.can_transition(to) {
            Ok(())
        } else {
            Err(HandshakeError::InvalidTransition {
                from: self.state.name(),
                to: to.name(),
            })
        }
    }

    async fn send_to_peer(&self, conn: &mut SmpConnection, body: &[u8]) -> Result<ServerMessage> {
        let command = Command::Send { notify: true, body };
        conn.send_command(&self.peer_queue.sender_id, &command, self.sender_key.as_ref())
            .await
    }

    /// Send our confirmation to the peer's queue.
    ///
    /// # Errors
    ///
    /// - [`HandshakeError::ConfirmationRejected`] on `ERR`
    /// - [`HandshakeError::InvalidTransition`] unless the connection is a
    ///   fresh joining connection
    pub async fn send_confirmation(
        &mut self,
        conn: &mut SmpConnection,
        reply_queue: &QueueInfo,
        profile: &Profile,
    ) -> Result<()> {
        self.ensure_transition(HandshakeState::ConfirmationSent)?;
        let ratchet_keys = self
            .confirmation_keys
            .ok_or(HandshakeError::MissingRatchetKeys)?;

        let conn_info = ConnInfoReply {
            queue: reply_queue.clone(),
            profile: profile.clone(),
        }
        .encode()?;
        let encrypted_conn_info = self.ratchet.encrypt(&conn_info, CONN_INFO_PADDED_LEN)?;
        let body = Confirmation {
            ratchet_keys,
            encrypted_conn_info,
        }
        .encode()?;
        let padded = pad_block(&body, CONFIRMATION_PADDED_LEN)?;
        let message = ClientMessage::seal(&padded, &self.peer_queue.dh_public, &self.conn_dh)?.encode()?;

        match self.send_to_peer(conn, &message).await? {
            ServerMessage::Ok => {}
            ServerMessage::Err(code) => return Err(HandshakeError::ConfirmationRejected(code).into()),
            other => return Err(HandshakeError::ConfirmationRejected(other.name().to_string()).into()),
        }
        tracing::info!(
            "Confirmation sent to {}:{} ({} byte envelope)",
            self.peer_queue.host,
            self.peer_queue.port,
            message.len()
        );
        self.transition_to(HandshakeState::ConfirmationSent)?;
        Ok(())
    }

    /// Secure the peer's queue with `SKEY`. Later `SEND`s are signed with the
    /// new sender key.
    ///
    /// An `ERR` reply is not fatal: the queue may already be secured. The
    /// state still advances and sends stay unsigned.
    ///
    /// # Errors
    ///
    /// Returns transport and timeout errors, and
    /// [`HandshakeError::InvalidTransition`] outside `ConfirmationSent`.
    pub async fn secure_queue(&mut self, conn: &mut SmpConnection) -> Result<()> {
        self.ensure_transition(HandshakeState::SkeySent)?;
        let sender_key = SigningKey::generate(&mut OsRng);
        let sender_spki = sender_key.verifying_key().to_spki();

        let command = Command::Skey {
            sender_spki: &sender_spki,
        };
        match conn.send_command(&self.peer_queue.sender_id, &command, None).await? {
            ServerMessage::Ok => {
                tracing::debug!("Peer queue secured");
                self.sender_key = Some(sender_key);
            }
            ServerMessage::Err(code) => {
                tracing::warn!("SKEY rejected ({}), continuing unsecured", code);
            }
            other => tracing::warn!("Unexpected {} in reply to SKEY", other.name()),
        }
        self.transition_to(HandshakeState::SkeySent)?;
        Ok(())
    }

    /// Send HELLO. The chain advances only once the server accepted it.
    ///
    /// # Errors
    ///
    /// - [`HandshakeError::HelloRejected`] on `ERR`
    /// - ratchet errors if we cannot send yet
    pub async fn send_hello(&mut self, conn: &mut SmpConnection) -> Result<()> {
        self.ensure_transition(HandshakeState::HelloSent)?;
        match self.send_agent_message(conn, AgentBody::Hello).await {
            Ok(()) => {}
            Err(Error::Queue(QueueError::ServerRejected(code))) => {
                return Err(HandshakeError::HelloRejected(code).into());
            }
            Err(e) => return Err(e),
        }
        tracing::info!("HELLO sent to {}", self.peer_name);
        self.transition_to(HandshakeState::HelloSent)?;
        Ok(())
    }

    /// Take the optimistic fast path after our HELLO.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::InvalidTransition`] outside `HelloSent`.
    pub fn mark_connected(&mut self) -> Result<()> {
        self.transition_to(HandshakeState::Connected)?;
        tracing::info!("Connected to {} (peer HELLO pending)", self.peer_name);
        Ok(())
    }

    /// Send a text message.
    ///
    /// # Errors
    ///
    /// - [`HandshakeError::NotReady`] before the connection is established
    /// - [`QueueError::ServerRejected`] on `ERR`
    pub async fn send_text(&mut self, conn: &mut SmpConnection, text: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(HandshakeError::NotReady(self.state.name()).into());
        }
        self.send_agent_message(conn, AgentBody::Text(text.to_string())).await
    }

    async fn send_agent_message(&mut self, conn: &mut SmpConnection, body: AgentBody) -> Result<()> {
        let mut chain = self.chain.clone();
        let plaintext = chain.build(body);
        let envelope = encode_agent_envelope(&self.ratchet.encrypt(&plaintext, HELLO_PADDED_LEN)?);
        let message = ClientMessage::seal(&envelope, &self.peer_queue.dh_public, &self.conn_dh)?.encode()?;

        match self.send_to_peer(conn, &message).await? {
            ServerMessage::Ok => {
                self.chain = chain;
                Ok(())
            }
            ServerMessage::Err(code) => Err(QueueError::ServerRejected(code).into()),
            other => Err(ParseError::UnexpectedCommand(other.name().to_string()).into()),
        }
    }

    /// Try to decrypt an AgentMsgEnvelope from this peer. The ratchet is
    /// unchanged on failure, so callers may try several connections.
    ///
    /// A HELLO advances the handshake: `HelloSent -> HelloReceived ->
    /// Connected`.
    ///
    /// # Errors
    ///
    /// Returns envelope, ratchet and agent message parse errors.
    pub fn receive(&mut self, envelope: &[u8], sender_dh: x25519::PublicKey) -> Result<AgentMessage> {
        let ciphertext = decode_agent_envelope(envelope)?;
        let plaintext = self.ratchet.decrypt(ciphertext)?;
        let message = AgentMessage::decode(&plaintext)?;

        if self.peer_conn_dh.is_none() {
            self.peer_conn_dh = Some(sender_dh);
        }
        if message.msg_id <= self.last_peer_msg_id {
            tracing::warn!(
                "Peer msgId {} not after {}",
                message.msg_id,
                self.last_peer_msg_id
            );
        }
        if self.last_peer_hash.is_some() && message.prev_hash != self.last_peer_hash {
            tracing::warn!("Peer message hash chain broken at msgId {}", message.msg_id);
        }
        self.last_peer_msg_id = message.msg_id;
        self.last_peer_hash = Some(sha256(&plaintext));

        if message.body == AgentBody::Hello {
            match self.state {
                HandshakeState::HelloSent => {
                    self.transition_to(HandshakeState::HelloReceived)?;
                    self.transition_to(HandshakeState::Connected)?;
                    tracing::info!("Connected to {}", self.peer_name);
                }
                HandshakeState::Connected => tracing::debug!("Peer HELLO after optimistic connect"),
                state => tracing::warn!("Peer HELLO in state {:?}", state),
            }
        }
        Ok(message)
    }
}

impl std::fmt::Debug for AgentConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentConnection")
            .field("state", &self.state)
            .field("peer_name", &self.peer_name)
            .field("peer_server", &format_args!("{}:{}", self.peer_queue.host, self.peer_queue.port))
            .field("next_msg_id", &self.chain.next_msg_id())
            .finish_non_exhaustive()
    }
}
