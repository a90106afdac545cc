//! Opportunistic parsing of delivered message bodies.
//!
//! The input is a message body after the server layer was removed. The
//! parser looks for the sender's X25519 key, opens the client box with the
//! receiving queue's DH key and classifies what is inside. It never fails:
//! anything it cannot make sense of is logged and reported as
//! [`IncomingMessage::Unknown`].

use crate::agent::envelope::{
    AGENT_VERSION, CONFIRMATION_TAG, ClientMessage, INVITATION_TAG, PRIVATE_HEADER,
};
use crate::invitation::{PendingPeer, parse_invitation};
use smp_crypto::spki::{KeyAlgorithm, find_spki_header};
use smp_crypto::x25519;

/// Largest length prefix taken at face value
const MAX_SANE_PREFIX: usize = 16100;

/// How far into a private body the `'_'` marker may appear
const PRIVATE_HEADER_WINDOW: usize = 10;

/// Classified incoming message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingMessage {
    /// AgentMsgEnvelope for an established connection
    AgentMessage {
        /// Sender's connection DH key
        sender_dh: x25519::PublicKey,
        /// Envelope bytes, starting with the agent version
        envelope: Vec<u8>,
    },
    /// Confirmation of a peer joining our invitation
    Confirmation {
        /// Sender's connection DH key
        sender_dh: x25519::PublicKey,
        /// Private body, starting with `'_'`
        body: Vec<u8>,
    },
    /// Invitation to connect to another queue
    Invitation(PendingPeer),
    /// Nothing recognizable
    Unknown,
}

/// Strip a `[len: u16]` prefix when it looks like one.
#[must_use]
pub fn strip_length_prefix(data: &[u8]) -> &[u8] {
    if data.len() < 2 {
        return data;
    }
    let prefix = usize::from(u16::from_be_bytes([data[0], data[1]]));
    if prefix > 0 && prefix < data.len() - 2 && prefix < MAX_SANE_PREFIX {
        &data[2..2 + prefix]
    } else {
        data
    }
}

/// Classify a delivered body addressed to the queue owning `queue_dh`.
#[must_use]
pub fn parse_incoming(data: &[u8], queue_dh: &x25519::PrivateKey) -> IncomingMessage {
    let data = strip_length_prefix(data);
    let Some(offset) = find_spki_header(KeyAlgorithm::X25519, data) else {
        tracing::debug!("No sender key in {} byte message", data.len());
        return IncomingMessage::Unknown;
    };
    let message = match ClientMessage::decode_at_spki(data, offset) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!("Truncated client message: {}", e);
            return IncomingMessage::Unknown;
        }
    };
    let plaintext = match message.open(queue_dh) {
        Ok(plaintext) => plaintext,
        Err(e) => {
            tracing::warn!("Client message did not decrypt: {}", e);
            return IncomingMessage::Unknown;
        }
    };

    let mut envelope_prefix = AGENT_VERSION.to_be_bytes().to_vec();
    envelope_prefix.push(b'M');
    if plaintext.starts_with(&envelope_prefix) {
        return IncomingMessage::AgentMessage {
            sender_dh: message.sender_dh,
            envelope: plaintext,
        };
    }

    classify_private(strip_length_prefix(&plaintext), message.sender_dh)
}

fn classify_private(body: &[u8], sender_dh: x25519::PublicKey) -> IncomingMessage {
    let window = &body[..body.len().min(PRIVATE_HEADER_WINDOW)];
    let Some(start) = window.iter().position(|&b| b == PRIVATE_HEADER) else {
        tracing::debug!("Decrypted message without private header");
        return IncomingMessage::Unknown;
    };
    match body.get(start + 3) {
        Some(&CONFIRMATION_TAG) => IncomingMessage::Confirmation {
            sender_dh,
            body: body[start..].to_vec(),
        },
        Some(&INVITATION_TAG) => {
            let text = String::from_utf8_lossy(&body[start + 4..]);
            match parse_invitation(&text) {
                Ok(peer) => IncomingMessage::Invitation(peer),
                Err(e) => {
                    tracing::warn!("Invitation message without usable link: {}", e);
                    IncomingMessage::Unknown
                }
            }
        }
        other => {
            tracing::debug!("Unknown private header marker {:?}", other.map(|&b| char::from(b)));
            IncomingMessage::Unknown
        }
    }
}
