//! Nested agent envelopes.
//!
//! From the outside in, a message written to a peer's queue is:
//!
//! ```text
//! ClientMessage    [clientVersion: u16 = 4] '1' [44] [SPKI(sender conn DH)] [nonce 24] [box]
//!  box plaintext:
//!   AgentMsgEnvelope   [agentVersion: u16 = 5] 'M' [ratchet ciphertext]            (HELLO, text)
//!   confirmation       [len: u16] '_' [0, 5] 'C' '1' [e2eVersion: u16 = 2]
//!                      [68] [SPKI(X448 key1)] [68] [SPKI(X448 key2)] [ratchet ciphertext]
//!                      '#' padding to 15904 bytes
//!   invitation         [len: u16] '_' [0, 5] 'I' <link> '#' padding
//! ```
//!
//! The ratchet ciphertext of a confirmation carries the connection info
//! reply: `'D' [queueCount: u16 = 1] [queue info] [x.info JSON]`.

use crate::encoding::{Reader, push_len_prefixed};
use crate::error::{ParseError, Result};
use crate::queue::QueueInfo;
use serde::{Deserialize, Serialize};
use smp_crypto::random::random_array;
use smp_crypto::spki::{KeyAlgorithm, decode_spki, encode_spki};
use smp_crypto::x25519::X25519_SPKI_SIZE;
use smp_crypto::{BOX_NONCE_SIZE, nacl_box, x25519, x448};

/// Agent envelope version
pub const AGENT_VERSION: u16 = 5;

/// Client message version
pub const CLIENT_VERSION: u16 = 4;

/// End-to-end encryption version announced in confirmations
pub const E2E_VERSION: u16 = 2;

/// Ratchet padding target of HELLO and text messages
pub const HELLO_PADDED_LEN: usize = 15840;

/// Ratchet padding target of the connection info reply
pub const CONN_INFO_PADDED_LEN: usize = 14832;

/// Padded size of a confirmation before boxing
pub const CONFIRMATION_PADDED_LEN: usize = 15904;

/// Marker opening a private header (confirmation, invitation)
pub const PRIVATE_HEADER: u8 = b'_';

/// Private header marker of a confirmation
pub const CONFIRMATION_TAG: u8 = b'C';

/// Private header marker of an invitation
pub const INVITATION_TAG: u8 = b'I';

const ENVELOPE_TAG: u8 = b'M';
const CLIENT_MESSAGE_TAG: u8 = b'1';
const CONFIRMATION_FORMAT: u8 = b'1';
const CONN_INFO_TAG: u8 = b'D';
const PAD_BYTE: u8 = b'#';

/// Wrap ratchet ciphertext in an AgentMsgEnvelope.
#[must_use]
pub fn encode_agent_envelope(ratchet_ciphertext: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(3 + ratchet_ciphertext.len());
    out.extend_from_slice(&AGENT_VERSION.to_be_bytes());
    out.push(ENVELOPE_TAG);
    out.extend_from_slice(ratchet_ciphertext);
    out
}

/// Ratchet ciphertext of an AgentMsgEnvelope.
///
/// # Errors
///
/// Returns [`ParseError::InvalidEnvelope`] for a wrong version or tag.
pub fn decode_agent_envelope(data: &[u8]) -> std::result::Result<&[u8], ParseError> {
    let mut reader = Reader::new(data);
    let version = reader.read_u16()?;
    if version != AGENT_VERSION || reader.read_u8()? != ENVELOPE_TAG {
        return Err(ParseError::InvalidEnvelope(format!(
            "not an agent envelope (version {version})"
        )));
    }
    Ok(reader.read_rest())
}

/// `[len: u16][body]` padded with `'#'` to `padded_len`.
///
/// # Errors
///
/// Returns [`ParseError::FieldTooLong`] if the body does not fit.
pub fn pad_block(body: &[u8], padded_len: usize) -> std::result::Result<Vec<u8>, ParseError> {
    if body.len() + 2 > padded_len || body.len() > usize::from(u16::MAX) {
        return Err(ParseError::FieldTooLong(body.len()));
    }
    let mut out = Vec::with_capacity(padded_len);
    out.extend_from_slice(&(body.len() as u16).to_be_bytes());
    out.extend_from_slice(body);
    out.resize(padded_len, PAD_BYTE);
    Ok(out)
}

/// Body of a [`pad_block`] buffer.
///
/// # Errors
///
/// Returns [`ParseError::TruncatedResponse`] if the length overruns the buffer.
pub fn unpad_block(data: &[u8]) -> std::result::Result<&[u8], ParseError> {
    let mut reader = Reader::new(data);
    let len = reader.read_u16()?;
    reader.read_bytes(usize::from(len))
}

/// Outer client envelope addressed to a queue's DH key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMessage {
    /// Sender's connection DH key
    pub sender_dh: x25519::PublicKey,
    /// Box nonce
    pub nonce: [u8; BOX_NONCE_SIZE],
    /// Boxed payload
    pub ciphertext: Vec<u8>,
}

impl ClientMessage {
    /// Box `plaintext` for the queue key `peer_dh` under a fresh nonce.
    ///
    /// # Errors
    ///
    /// Returns crypto errors from the RNG or the box.
    pub fn seal(
        plaintext: &[u8],
        peer_dh: &x25519::PublicKey,
        our_dh: &x25519::PrivateKey,
    ) -> Result<Self> {
        let nonce = random_array()?;
        let ciphertext = nacl_box::seal(plaintext, &nonce, peer_dh, our_dh)?;
        Ok(Self {
            sender_dh: our_dh.public_key(),
            nonce,
            ciphertext,
        })
    }

    /// Open with the receiving queue's DH key.
    ///
    /// # Errors
    ///
    /// Returns a crypto error if the box does not authenticate.
    pub fn open(&self, queue_dh: &x25519::PrivateKey) -> Result<Vec<u8>> {
        Ok(nacl_box::open(
            &self.ciphertext,
            &self.nonce,
            &self.sender_dh,
            queue_dh,
        )?)
    }

    /// Wire encoding.
    ///
    /// # Errors
    ///
    /// Returns SPKI encoding errors.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(72 + self.ciphertext.len());
        out.extend_from_slice(&CLIENT_VERSION.to_be_bytes());
        out.push(CLIENT_MESSAGE_TAG);
        push_len_prefixed(&mut out, &self.sender_dh.to_spki())?;
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        Ok(out)
    }

    /// Strict decode of [`ClientMessage::encode`] output.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] or SPKI errors for malformed input.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(data);
        let _version = reader.read_u16()?;
        reader.expect(&[CLIENT_MESSAGE_TAG])?;
        let spki = reader.read_short_field()?;
        let sender_dh = x25519::PublicKey::from_spki(spki)?;
        let nonce = reader.read_array()?;
        Ok(Self {
            sender_dh,
            nonce,
            ciphertext: reader.read_rest().to_vec(),
        })
    }

    /// Decode from the position of the sender's SPKI header, skipping
    /// whatever precedes it.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] or SPKI errors if the tail is too short.
    pub fn decode_at_spki(data: &[u8], spki_offset: usize) -> Result<Self> {
        let tail = data.get(spki_offset..).unwrap_or_default();
        let mut reader = Reader::new(tail);
        let spki = reader.read_bytes(X25519_SPKI_SIZE)?;
        let sender_dh = x25519::PublicKey::from_spki(spki)?;
        let nonce = reader.read_array()?;
        Ok(Self {
            sender_dh,
            nonce,
            ciphertext: reader.read_rest().to_vec(),
        })
    }
}

/// Profile sent in the `x.info` event
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Display name
    pub display_name: String,
    /// Full name
    #[serde(default)]
    pub full_name: String,
}

#[derive(Serialize, Deserialize)]
struct InfoParams {
    profile: Profile,
}

#[derive(Serialize, Deserialize)]
struct ChatEvent {
    v: String,
    event: String,
    params: InfoParams,
}

/// Connection info reply: where to reach us and who we are
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnInfoReply {
    /// Our reply queue
    pub queue: QueueInfo,
    /// Our profile
    pub profile: Profile,
}

impl ConnInfoReply {
    /// `'D' [1: u16] [queue info] [x.info JSON]`
    ///
    /// # Errors
    ///
    /// Returns queue info encoding errors.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = vec![CONN_INFO_TAG];
        out.extend_from_slice(&1u16.to_be_bytes());
        out.extend_from_slice(&self.queue.encode()?);
        let event = ChatEvent {
            v: "1-2".to_string(),
            event: "x.info".to_string(),
            params: InfoParams {
                profile: self.profile.clone(),
            },
        };
        out.extend_from_slice(&serde_json::to_vec(&event).map_err(|e| ParseError::InvalidEnvelope(e.to_string()))?);
        Ok(out)
    }

    /// Decode; a profile that is not valid `x.info` JSON becomes the default.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] for a wrong tag or no queues.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(data);
        reader.expect(&[CONN_INFO_TAG])?;
        let count = reader.read_u16()?;
        if count == 0 {
            return Err(ParseError::InvalidEnvelope("connection info without queues".to_string()).into());
        }
        let queue = QueueInfo::decode(&mut reader)?;
        for _ in 1..count {
            QueueInfo::decode(&mut reader)?;
        }
        let profile = match serde_json::from_slice::<ChatEvent>(reader.read_rest()) {
            Ok(event) if event.event == "x.info" => event.params.profile,
            Ok(event) => {
                tracing::debug!("Ignoring {} event in connection info", event.event);
                Profile::default()
            }
            Err(e) => {
                tracing::debug!("Unreadable connection info profile: {}", e);
                Profile::default()
            }
        };
        Ok(Self { queue, profile })
    }
}

/// Agent confirmation: the joining party's X3DH keys and the encrypted
/// connection info reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    /// Joining party's X448 keys
    pub ratchet_keys: (x448::PublicKey, x448::PublicKey),
    /// Ratchet ciphertext of a [`ConnInfoReply`]
    pub encrypted_conn_info: Vec<u8>,
}

impl Confirmation {
    /// Encode the private body, starting with `'_'`.
    ///
    /// # Errors
    ///
    /// Returns SPKI encoding errors.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(145 + self.encrypted_conn_info.len());
        out.push(PRIVATE_HEADER);
        out.extend_from_slice(&AGENT_VERSION.to_be_bytes());
        out.push(CONFIRMATION_TAG);
        out.push(CONFIRMATION_FORMAT);
        out.extend_from_slice(&E2E_VERSION.to_be_bytes());
        for key in [&self.ratchet_keys.0, &self.ratchet_keys.1] {
            push_len_prefixed(&mut out, &encode_spki(KeyAlgorithm::X448, key.as_bytes())?)?;
        }
        out.extend_from_slice(&self.encrypted_conn_info);
        Ok(out)
    }

    /// Decode a private body starting with `'_'`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] or SPKI errors for malformed input.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(body);
        reader.expect(&[PRIVATE_HEADER])?;
        let _agent_version = reader.read_u16()?;
        reader.expect(&[CONFIRMATION_TAG, CONFIRMATION_FORMAT])?;
        let e2e_version = reader.read_u16()?;
        if e2e_version < E2E_VERSION {
            return Err(ParseError::InvalidEnvelope(format!("e2e version {e2e_version}")).into());
        }
        let key1 = x448::PublicKey::from_slice(decode_spki(KeyAlgorithm::X448, reader.read_short_field()?)?)?;
        let key2 = x448::PublicKey::from_slice(decode_spki(KeyAlgorithm::X448, reader.read_short_field()?)?)?;
        Ok(Self {
            ratchet_keys: (key1, key2),
            encrypted_conn_info: reader.read_rest().to_vec(),
        })
    }
}

/// Private body announcing an invitation link.
#[must_use]
pub fn encode_invitation_message(link: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + link.len());
    out.push(PRIVATE_HEADER);
    out.extend_from_slice(&AGENT_VERSION.to_be_bytes());
    out.push(INVITATION_TAG);
    out.extend_from_slice(link.as_bytes());
    out
}
