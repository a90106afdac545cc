//! Agent messages and the msgId / prevHash chain.
//!
//! ```text
//! 'M' [msgId: u64] [prevHashLen: u8] [prevHash: 0 | 32] 'H'          HELLO
//! 'M' [msgId: u64] [prevHashLen: u8] [prevHash: 0 | 32] 'M' <text>   text
//! ```
//!
//! `prevHash` is the SHA-256 of the previous agent message we produced,
//! empty for the first one.

use crate::encoding::Reader;
use crate::error::ParseError;
use smp_crypto::hash::sha256;

/// Leading tag of every agent message
pub const AGENT_MESSAGE_TAG: u8 = b'M';

/// Body tag of HELLO
pub const HELLO_TAG: u8 = b'H';

/// Body tag of a text message
pub const TEXT_TAG: u8 = b'M';

/// Agent message body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentBody {
    /// Handshake completion
    Hello,
    /// User text
    Text(String),
}

/// Decoded agent message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentMessage {
    /// Sender's message id
    pub msg_id: u64,
    /// Hash of the sender's previous message
    pub prev_hash: Option<[u8; 32]>,
    /// Body
    pub body: AgentBody,
}

impl AgentMessage {
    /// Encode to plaintext for the ratchet.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(44);
        out.push(AGENT_MESSAGE_TAG);
        out.extend_from_slice(&self.msg_id.to_be_bytes());
        match &self.prev_hash {
            Some(hash) => {
                out.push(32);
                out.extend_from_slice(hash);
            }
            None => out.push(0),
        }
        match &self.body {
            AgentBody::Hello => out.push(HELLO_TAG),
            AgentBody::Text(text) => {
                out.push(TEXT_TAG);
                out.extend_from_slice(text.as_bytes());
            }
        }
        out
    }

    /// Decode a ratchet plaintext.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] for a wrong tag, truncated fields or a hash
    /// length other than 0 or 32.
    pub fn decode(data: &[u8]) -> Result<Self, ParseError> {
        let mut reader = Reader::new(data);
        reader.expect(&[AGENT_MESSAGE_TAG])?;
        let msg_id = reader.read_u64()?;
        let prev_hash = match reader.read_short_field()? {
            [] => None,
            hash => Some(
                hash.try_into()
                    .map_err(|_| ParseError::InvalidEnvelope(format!("prevHash of {} bytes", hash.len())))?,
            ),
        };
        let body = match reader.read_u8()? {
            HELLO_TAG => AgentBody::Hello,
            TEXT_TAG => AgentBody::Text(String::from_utf8_lossy(reader.read_rest()).into_owned()),
            tag => {
                return Err(ParseError::UnexpectedCommand(format!(
                    "agent message tag {:?}",
                    char::from(tag)
                )));
            }
        };
        Ok(Self {
            msg_id,
            prev_hash,
            body,
        })
    }
}

/// Extract the msgId of a HELLO, `None` for anything else.
#[must_use]
pub fn parse_hello(data: &[u8]) -> Option<u64> {
    match AgentMessage::decode(data) {
        Ok(AgentMessage {
            msg_id,
            body: AgentBody::Hello,
            ..
        }) => Some(msg_id),
        _ => None,
    }
}

/// Outgoing message numbering and hash chain of one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageChain {
    next_msg_id: u64,
    prev_hash: Option<[u8; 32]>,
}

impl Default for MessageChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageChain {
    /// Chain starting at msgId 1 with no previous hash
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_msg_id: 1,
            prev_hash: None,
        }
    }

    /// Id the next message will carry
    #[must_use]
    pub fn next_msg_id(&self) -> u64 {
        self.next_msg_id
    }

    /// Hash of the last message built
    #[must_use]
    pub fn prev_hash(&self) -> Option<&[u8; 32]> {
        self.prev_hash.as_ref()
    }

    /// Build the next message and advance the chain.
    pub fn build(&mut self, body: AgentBody) -> Vec<u8> {
        let encoded = AgentMessage {
            msg_id: self.next_msg_id,
            prev_hash: self.prev_hash,
            body,
        }
        .encode();
        self.next_msg_id += 1;
        self.prev_hash = Some(sha256(&encoded));
        encoded
    }

    /// Build the next HELLO (11 or 43 bytes).
    pub fn build_hello(&mut self) -> Vec<u8> {
        self.build(AgentBody::Hello)
    }

    /// Build the next text message.
    pub fn build_text(&mut self, text: &str) -> Vec<u8> {
        self.build(AgentBody::Text(text.to_string()))
    }
}
