//! SMP queues we control.
//!
//! A [`QueueRecord`] is created by `NEW` and holds the recipient keys for
//! that queue: an Ed25519 key that signs our commands and an X25519 key the
//! server encrypts delivered messages to. Every command follows the same
//! pattern: sign, send, await the correlated response.

use crate::connection::SmpConnection;
use crate::encoding::{Reader, push_len_prefixed};
use crate::error::{Error, ParseError, QueueError, Result};
use crate::serde_hex;
use crate::transmission::{Command, QueueIds, ResponseTransmission, ServerMessage};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use smp_crypto::signatures::SigningKey;
use smp_crypto::{ED25519_KEYPAIR_SIZE, nacl_box, x25519};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Client version written in queue info
pub const QUEUE_INFO_VERSION: u16 = 4;

/// Address of a queue as exchanged between peers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    /// Client version
    pub version: u16,
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Server key hash
    pub key_hash: [u8; 32],
    /// Sender id the peer writes to
    pub sender_id: Vec<u8>,
    /// Queue owner's X25519 DH public key
    pub dh_public: x25519::PublicKey,
}

impl QueueInfo {
    /// Encode as
    /// `[version u16][1][hostLen][host][portLen][port][32][keyHash][sndIdLen][sndId][44][SPKI dh]`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::FieldTooLong`] for oversized fields.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(128);
        out.extend_from_slice(&self.version.to_be_bytes());
        out.push(1);
        push_len_prefixed(&mut out, self.host.as_bytes())?;
        push_len_prefixed(&mut out, self.port.to_string().as_bytes())?;
        push_len_prefixed(&mut out, &self.key_hash)?;
        push_len_prefixed(&mut out, &self.sender_id)?;
        push_len_prefixed(&mut out, &self.dh_public.to_spki())?;
        Ok(out)
    }

    /// Decode queue info, reading only the fields it owns.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] variants for truncated or invalid fields.
    pub fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        let version = reader.read_u16()?;
        let host_count = reader.read_u8()?;
        if host_count == 0 {
            return Err(ParseError::InvalidEnvelope("queue info without hosts".to_string()).into());
        }
        let host = String::from_utf8_lossy(reader.read_short_field()?).into_owned();
        for _ in 1..host_count {
            reader.read_short_field()?;
        }
        let port_text = String::from_utf8_lossy(reader.read_short_field()?).into_owned();
        let port = port_text
            .parse()
            .map_err(|_| ParseError::InvalidEnvelope(format!("bad port {port_text:?}")))?;
        let key_hash_field = reader.read_short_field()?;
        let key_hash: [u8; 32] = key_hash_field
            .try_into()
            .map_err(|_| ParseError::InvalidEnvelope("key hash must be 32 bytes".to_string()))?;
        let sender_id = reader.read_short_field()?.to_vec();
        let dh_public = x25519::PublicKey::from_spki(reader.read_short_field()?)?;
        Ok(Self {
            version,
            host,
            port,
            key_hash,
            sender_id,
            dh_public,
        })
    }
}

/// One SMP queue we own
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct QueueRecord {
    /// Recipient id (≤ 24 bytes)
    #[serde(with = "serde_hex")]
    pub recipient_id: Vec<u8>,
    /// Sender id (≤ 24 bytes)
    #[serde(with = "serde_hex")]
    pub sender_id: Vec<u8>,
    #[serde(with = "serde_hex")]
    auth_keypair: [u8; ED25519_KEYPAIR_SIZE],
    #[serde(with = "serde_hex")]
    dh_secret: [u8; 32],
    #[serde(with = "serde_hex::option", default)]
    server_dh_public: Option<[u8; 32]>,
    #[serde(with = "serde_hex::option", default)]
    shared_secret: Option<[u8; 32]>,
    /// Server host
    pub server_host: String,
    /// Server port
    pub server_port: u16,
    /// Server key hash
    #[serde(with = "serde_hex")]
    pub server_key_hash: [u8; 32],
}

impl QueueRecord {
    /// Fresh keys for a queue on the given server; ids are set by `IDS`.
    #[must_use]
    pub fn generate(host: &str, port: u16, key_hash: [u8; 32]) -> Self {
        let auth = SigningKey::generate(&mut OsRng);
        let dh = x25519::PrivateKey::generate(&mut OsRng);
        Self {
            recipient_id: Vec::new(),
            sender_id: Vec::new(),
            auth_keypair: auth.to_keypair_bytes(),
            dh_secret: dh.to_bytes(),
            server_dh_public: None,
            shared_secret: None,
            server_host: host.to_string(),
            server_port: port,
            server_key_hash: key_hash,
        }
    }

    /// Create a queue with `NEW` on the connection's server.
    ///
    /// # Errors
    ///
    /// - [`QueueError::ServerRejected`] on `ERR`
    /// - [`QueueError::MalformedIds`] for invalid `IDS` fields
    /// - [`QueueError::Timeout`] if the server does not answer
    pub async fn create(conn: &mut SmpConnection) -> Result<Self> {
        let mut record = Self::generate(conn.host(), conn.port(), conn.server_key_hash());
        let signer = record.signing_key()?;
        let auth_spki = signer.verifying_key().to_spki();
        let dh_spki = record.dh_public().to_spki();

        #[cfg(feature = "log-key-prefixes")]
        tracing::debug!(
            "NEW auth key {}.. dh key {}..",
            hex::encode(&auth_spki[12..16]),
            hex::encode(&dh_spki[12..16])
        );

        let command = Command::New {
            auth_spki: &auth_spki,
            dh_spki: &dh_spki,
        };
        match conn.send_command(&[], &command, Some(&signer)).await? {
            ServerMessage::Ids(ids) => record.apply_ids(ids)?,
            ServerMessage::Err(code) => return Err(QueueError::ServerRejected(code).into()),
            other => return Err(unexpected(&other)),
        }
        tracing::info!(
            "Created queue on {}:{} (recipient id {} bytes)",
            record.server_host,
            record.server_port,
            record.recipient_id.len()
        );
        Ok(record)
    }

    /// Store the ids and server key from an `IDS` response and derive the
    /// shared secret.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::MalformedIds`] if the server key is low-order.
    pub fn apply_ids(&mut self, ids: QueueIds) -> Result<()> {
        let shared = self
            .dh_private()
            .diffie_hellman(&ids.server_dh_public)
            .map_err(|_| QueueError::MalformedIds("low-order server DH key".to_string()))?;
        self.recipient_id = ids.recipient_id;
        self.sender_id = ids.sender_id;
        self.server_dh_public = Some(ids.server_dh_public.to_bytes());
        self.shared_secret = Some(*shared.as_bytes());
        Ok(())
    }

    /// Subscribe with `SUB`.
    ///
    /// A pending message delivered in place of `OK` also confirms the
    /// subscription; it is queued on the connection.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ServerRejected`] on `ERR`.
    pub async fn subscribe(&self, conn: &mut SmpConnection) -> Result<()> {
        let reply = conn
            .send_command(&self.recipient_id, &Command::Sub, Some(&self.signing_key()?))
            .await?;
        self.expect_ok(conn, reply)
    }

    /// Acknowledge a delivered message with `ACK`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ServerRejected`] on `ERR`.
    pub async fn ack(&self, conn: &mut SmpConnection, msg_id: &[u8]) -> Result<()> {
        let reply = conn
            .send_command(&self.recipient_id, &Command::Ack { msg_id }, Some(&self.signing_key()?))
            .await?;
        self.expect_ok(conn, reply)
    }

    /// Delete the queue with `DEL`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ServerRejected`] on `ERR`.
    pub async fn delete(&self, conn: &mut SmpConnection) -> Result<()> {
        match conn
            .send_command(&self.recipient_id, &Command::Del, Some(&self.signing_key()?))
            .await?
        {
            ServerMessage::Ok => Ok(()),
            ServerMessage::Err(code) => Err(QueueError::ServerRejected(code).into()),
            other => Err(unexpected(&other)),
        }
    }

    fn expect_ok(&self, conn: &mut SmpConnection, reply: ServerMessage) -> Result<()> {
        match reply {
            ServerMessage::Ok => Ok(()),
            ServerMessage::Err(code) => Err(QueueError::ServerRejected(code).into()),
            message @ ServerMessage::Msg { .. } => {
                conn.defer_push(ResponseTransmission {
                    corr_id: Vec::new(),
                    entity_id: self.recipient_id.clone(),
                    message,
                });
                Ok(())
            }
            other => Err(unexpected(&other)),
        }
    }

    /// Address of this queue for the peer.
    #[must_use]
    pub fn info(&self) -> QueueInfo {
        QueueInfo {
            version: QUEUE_INFO_VERSION,
            host: self.server_host.clone(),
            port: self.server_port,
            key_hash: self.server_key_hash,
            sender_id: self.sender_id.clone(),
            dh_public: self.dh_public(),
        }
    }

    /// Encoded queue info embedded in connection info replies.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::FieldTooLong`] for oversized fields.
    pub fn encode_info(&self) -> Result<Vec<u8>> {
        self.info().encode()
    }

    /// Open a delivered message body boxed by the server.
    ///
    /// The nonce is the message id zero-padded to 24 bytes.
    ///
    /// # Errors
    ///
    /// - [`QueueError::NotEstablished`] before `IDS` was applied
    /// - crypto errors if the box does not authenticate
    pub fn decrypt_message(&self, msg_id: &[u8], body: &[u8]) -> Result<Vec<u8>> {
        let server_public = self.server_dh_public().ok_or(QueueError::NotEstablished)?;
        let nonce = nacl_box::nonce_from_id(msg_id)?;
        Ok(nacl_box::open(body, &nonce, &server_public, &self.dh_private())?)
    }

    /// Ed25519 key signing commands on this queue.
    ///
    /// # Errors
    ///
    /// Returns a crypto error if the stored keypair is inconsistent.
    pub fn signing_key(&self) -> Result<SigningKey> {
        Ok(SigningKey::from_keypair_bytes(&self.auth_keypair)?)
    }

    /// X25519 private key of the queue
    #[must_use]
    pub fn dh_private(&self) -> x25519::PrivateKey {
        x25519::PrivateKey::from_bytes(self.dh_secret)
    }

    /// X25519 public key of the queue
    #[must_use]
    pub fn dh_public(&self) -> x25519::PublicKey {
        self.dh_private().public_key()
    }

    /// Server DH public key, once `IDS` was applied
    #[must_use]
    pub fn server_dh_public(&self) -> Option<x25519::PublicKey> {
        self.server_dh_public.map(x25519::PublicKey::from_bytes)
    }

    /// Shared secret with the server; only set together with the server key
    #[must_use]
    pub fn shared_secret(&self) -> Option<&[u8; 32]> {
        self.server_dh_public.and(self.shared_secret.as_ref())
    }

    /// Whether `IDS` was applied
    #[must_use]
    pub fn is_established(&self) -> bool {
        self.server_dh_public.is_some()
    }
}

fn unexpected(message: &ServerMessage) -> Error {
    ParseError::UnexpectedCommand(message.name().to_string()).into()
}

impl std::fmt::Debug for QueueRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueRecord")
            .field("recipient_id", &hex::encode(&self.recipient_id))
            .field("sender_id", &hex::encode(&self.sender_id))
            .field("server", &format_args!("{}:{}", self.server_host, self.server_port))
            .field("established", &self.is_established())
            .finish_non_exhaustive()
    }
}
