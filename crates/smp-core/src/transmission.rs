//! SMP command transmissions and server responses.
//!
//! ```text
//! transmission = [sigLen][signature][32][sessionId][corrLen][corrId][entLen][entityId][command]
//! response     = [txCount]{[txLen u16][authLen][auth][sessLen][sess][corrLen][corr][entLen][ent][command]}*
//! ```
//!
//! Signed commands sign `[32][sessionId] ++ [corrLen][corrId][entLen][entityId][command]`,
//! which is exactly the transmission after the signature field. Every
//! signature is verified locally before the transmission leaves.

use crate::encoding::{Reader, push_len_prefixed};
use crate::error::{Error, ParseError, QueueError, Result};
use smp_crypto::signatures::SigningKey;
use smp_crypto::x25519;

/// Maximum length of server-assigned queue and message identifiers
pub const MAX_ID_LEN: usize = 24;

/// Length of generated correlation ids
pub const CORR_ID_LEN: usize = 24;

/// Client command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    /// Create a queue with subscribe-on-create
    New {
        /// SPKI-encoded Ed25519 recipient auth key
        auth_spki: &'a [u8],
        /// SPKI-encoded X25519 recipient DH key
        dh_spki: &'a [u8],
    },
    /// Subscribe to a queue
    Sub,
    /// Send a message to a sender queue id
    Send {
        /// Ask the server to notify the recipient
        notify: bool,
        /// Message body
        body: &'a [u8],
    },
    /// Secure a queue with our sender key
    Skey {
        /// SPKI-encoded Ed25519 sender key
        sender_spki: &'a [u8],
    },
    /// Acknowledge a delivered message
    Ack {
        /// Server message id
        msg_id: &'a [u8],
    },
    /// Delete a queue
    Del,
}

impl Command<'_> {
    /// Command mnemonic
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Command::New { .. } => "NEW",
            Command::Sub => "SUB",
            Command::Send { .. } => "SEND",
            Command::Skey { .. } => "SKEY",
            Command::Ack { .. } => "ACK",
            Command::Del => "DEL",
        }
    }

    /// Encode the command part of a transmission.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::FieldTooLong`] for oversized short fields.
    pub fn encode(&self) -> std::result::Result<Vec<u8>, ParseError> {
        let mut out = Vec::new();
        match self {
            Command::New { auth_spki, dh_spki } => {
                out.extend_from_slice(b"NEW ");
                push_len_prefixed(&mut out, auth_spki)?;
                push_len_prefixed(&mut out, dh_spki)?;
                out.push(b'S');
            }
            Command::Sub => out.extend_from_slice(b"SUB"),
            Command::Send { notify, body } => {
                out.extend_from_slice(b"SEND ");
                out.push(if *notify { b'T' } else { b'F' });
                out.push(b' ');
                out.extend_from_slice(body);
            }
            Command::Skey { sender_spki } => {
                out.extend_from_slice(b"SKEY ");
                push_len_prefixed(&mut out, sender_spki)?;
            }
            Command::Ack { msg_id } => {
                out.extend_from_slice(b"ACK ");
                push_len_prefixed(&mut out, msg_id)?;
            }
            Command::Del => out.extend_from_slice(b"DEL"),
        }
        Ok(out)
    }
}

/// Build a transmission, signing it when `signer` is given.
///
/// # Errors
///
/// - [`ParseError::FieldTooLong`] for oversized ids
/// - [`QueueError::SignatureInvalid`] if the local self-check fails
pub fn build_transmission(
    session_id: &[u8],
    corr_id: &[u8],
    entity_id: &[u8],
    command: &Command<'_>,
    signer: Option<&SigningKey>,
) -> Result<Vec<u8>> {
    let mut signed = Vec::new();
    push_len_prefixed(&mut signed, session_id)?;
    push_len_prefixed(&mut signed, corr_id)?;
    push_len_prefixed(&mut signed, entity_id)?;
    signed.extend_from_slice(&command.encode()?);

    let mut out = Vec::with_capacity(signed.len() + 65);
    match signer {
        Some(key) => {
            let signature = key.sign_checked(&signed).map_err(|_| QueueError::SignatureInvalid)?;
            push_len_prefixed(&mut out, signature.as_bytes())?;
        }
        None => out.push(0),
    }
    out.extend_from_slice(&signed);
    Ok(out)
}

/// Identifiers returned by `IDS`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueIds {
    /// Recipient id (we read with it)
    pub recipient_id: Vec<u8>,
    /// Sender id (peers write with it)
    pub sender_id: Vec<u8>,
    /// Server X25519 DH public key
    pub server_dh_public: x25519::PublicKey,
}

/// Server response or push
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Queue created
    Ids(QueueIds),
    /// Command accepted
    Ok,
    /// Delivered message
    Msg {
        /// Server message id (box nonce source)
        msg_id: Vec<u8>,
        /// Server-encrypted body
        body: Vec<u8>,
    },
    /// Command rejected with an error code
    Err(String),
    /// Subscription moved to another session
    End,
}

impl ServerMessage {
    /// Mnemonic for logging
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerMessage::Ids(_) => "IDS",
            ServerMessage::Ok => "OK",
            ServerMessage::Msg { .. } => "MSG",
            ServerMessage::Err(_) => "ERR",
            ServerMessage::End => "END",
        }
    }

    /// Parse the command part of a response.
    ///
    /// # Errors
    ///
    /// - [`QueueError::MalformedIds`] for ids longer than 24 bytes or a bad DH key
    /// - [`ParseError::UnexpectedCommand`] for unknown mnemonics
    pub fn parse(command: &[u8]) -> Result<Self> {
        if command.starts_with(b"IDS ") {
            return parse_ids(&command[4..]).map(ServerMessage::Ids);
        }
        if let Some(rest) = command.strip_prefix(b"MSG ") {
            let mut reader = Reader::new(rest);
            let msg_id = reader.read_short_field()?;
            if msg_id.len() > MAX_ID_LEN {
                return Err(ParseError::FieldTooLong(msg_id.len()).into());
            }
            return Ok(ServerMessage::Msg {
                msg_id: msg_id.to_vec(),
                body: reader.read_rest().to_vec(),
            });
        }
        if let Some(code) = command.strip_prefix(b"ERR") {
            let code = String::from_utf8_lossy(code).trim().to_string();
            return Ok(ServerMessage::Err(code));
        }
        match command {
            b"OK" => Ok(ServerMessage::Ok),
            b"END" => Ok(ServerMessage::End),
            other => {
                let shown = &other[..other.len().min(8)];
                Err(ParseError::UnexpectedCommand(String::from_utf8_lossy(shown).into_owned()).into())
            }
        }
    }
}

fn parse_ids(data: &[u8]) -> Result<QueueIds> {
    let malformed = |what: &str| Error::from(QueueError::MalformedIds(what.to_string()));
    let mut reader = Reader::new(data);

    let recipient_id = reader.read_short_field().map_err(|_| malformed("recipient id"))?;
    if recipient_id.len() > MAX_ID_LEN {
        return Err(malformed("recipient id longer than 24 bytes"));
    }
    let sender_id = reader.read_short_field().map_err(|_| malformed("sender id"))?;
    if sender_id.len() > MAX_ID_LEN {
        return Err(malformed("sender id longer than 24 bytes"));
    }
    let dh_spki = reader.read_short_field().map_err(|_| malformed("server DH key"))?;
    let server_dh_public = x25519::PublicKey::from_spki(dh_spki).map_err(|_| malformed("server DH key"))?;

    Ok(QueueIds {
        recipient_id: recipient_id.to_vec(),
        sender_id: sender_id.to_vec(),
        server_dh_public,
    })
}

/// One parsed response transmission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseTransmission {
    /// Correlation id; empty for server pushes
    pub corr_id: Vec<u8>,
    /// Queue the response refers to
    pub entity_id: Vec<u8>,
    /// Response command
    pub message: ServerMessage,
}

/// Parse every transmission in a response block.
///
/// # Errors
///
/// Returns [`ParseError::TruncatedResponse`] if any framing field overruns
/// the block, or the command parse error of the first bad transmission.
pub fn parse_response_block(content: &[u8]) -> Result<Vec<ResponseTransmission>> {
    let mut reader = Reader::new(content);
    let count = reader.read_u8()?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let len = reader.read_u16()? as usize;
        out.push(parse_response_transmission(reader.read_bytes(len)?)?);
    }
    Ok(out)
}

/// Parse one response transmission (without the `txLen` prefix).
///
/// # Errors
///
/// See [`parse_response_block`].
pub fn parse_response_transmission(tx: &[u8]) -> Result<ResponseTransmission> {
    let mut reader = Reader::new(tx);
    let _auth = reader.read_short_field()?;
    let _session = reader.read_short_field()?;
    let corr_id = reader.read_short_field()?.to_vec();
    let entity_id = reader.read_short_field()?.to_vec();
    let message = ServerMessage::parse(reader.read_rest())?;
    Ok(ResponseTransmission {
        corr_id,
        entity_id,
        message,
    })
}

/// Encode a response block (used by test servers and fuzzing).
///
/// # Errors
///
/// Returns [`ParseError::FieldTooLong`] for oversized fields.
pub fn encode_response_block(
    session_id: &[u8],
    responses: &[(&[u8], &[u8], Vec<u8>)],
) -> std::result::Result<Vec<u8>, ParseError> {
    let mut out = vec![u8::try_from(responses.len()).map_err(|_| ParseError::FieldTooLong(responses.len()))?];
    for (corr_id, entity_id, command) in responses {
        let mut tx = vec![0u8];
        push_len_prefixed(&mut tx, session_id)?;
        push_len_prefixed(&mut tx, corr_id)?;
        push_len_prefixed(&mut tx, entity_id)?;
        tx.extend_from_slice(command);
        let len = u16::try_from(tx.len()).map_err(|_| ParseError::FieldTooLong(tx.len()))?;
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&tx);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;
    use smp_crypto::signatures::Signature;

    #[test]
    fn test_command_encoding() {
        assert_eq!(Command::Sub.encode().unwrap(), b"SUB");
        assert_eq!(Command::Del.encode().unwrap(), b"DEL");
        assert_eq!(
            Command::Send {
                notify: true,
                body: b"hi"
            }
            .encode()
            .unwrap(),
            b"SEND T hi"
        );
        assert_eq!(
            Command::Ack { msg_id: &[1, 2] }.encode().unwrap(),
            vec![b'A', b'C', b'K', b' ', 2, 1, 2]
        );
    }

    #[test]
    fn test_new_command_layout() {
        let auth = [0x11u8; 44];
        let dh = [0x22u8; 44];
        let bytes = Command::New {
            auth_spki: &auth,
            dh_spki: &dh,
        }
        .encode()
        .unwrap();
        assert_eq!(&bytes[..4], b"NEW ");
        assert_eq!(bytes[4], 44);
        assert_eq!(bytes[49], 44);
        assert_eq!(*bytes.last().unwrap(), b'S');
        assert_eq!(bytes.len(), 4 + 45 + 45 + 1);
    }

    #[test]
    fn test_signed_transmission_verifies() {
        let key = SigningKey::generate(&mut OsRng);
        let session_id = [0x5Au8; 32];
        let tx = build_transmission(&session_id, &[1u8; 24], b"", &Command::Sub, Some(&key)).unwrap();

        assert_eq!(tx[0], 64);
        let signature = Signature::from_slice(&tx[1..65]).unwrap();
        let signed = &tx[65..];
        assert_eq!(signed[0], 32);
        assert_eq!(&signed[1..33], &session_id);
        key.verifying_key().verify(signed, &signature).unwrap();
    }

    #[test]
    fn test_unsigned_transmission() {
        let tx = build_transmission(
            &[0u8; 32],
            &[2u8; 24],
            &[3u8; 12],
            &Command::Send {
                notify: true,
                body: b"x",
            },
            None,
        )
        .unwrap();
        assert_eq!(tx[0], 0);
        assert_eq!(tx[1], 32);
        assert_eq!(tx[34], 24);
        assert_eq!(tx[59], 12);
        assert!(tx.ends_with(b"SEND T x"));
    }

    #[test]
    fn test_parse_ids() {
        let server_key = x25519::PrivateKey::generate(&mut OsRng).public_key();
        let mut command = b"IDS ".to_vec();
        command.push(12);
        command.extend_from_slice(&[0xAA; 12]);
        command.push(12);
        command.extend_from_slice(&[0xBB; 12]);
        command.push(44);
        command.extend_from_slice(&server_key.to_spki());

        let ServerMessage::Ids(ids) = ServerMessage::parse(&command).unwrap() else {
            panic!("expected IDS");
        };
        assert_eq!(ids.recipient_id, vec![0xAA; 12]);
        assert_eq!(ids.sender_id, vec![0xBB; 12]);
        assert_eq!(ids.server_dh_public, server_key);
    }

    #[test]
    fn test_parse_ids_rejects_long_id() {
        let mut command = b"IDS ".to_vec();
        command.push(25);
        command.extend_from_slice(&[0xAA; 25]);
        command.push(1);
        command.push(0xBB);
        assert!(matches!(
            ServerMessage::parse(&command),
            Err(Error::Queue(QueueError::MalformedIds(_)))
        ));
    }

    #[test]
    fn test_parse_ids_rejects_bad_spki() {
        let mut command = b"IDS ".to_vec();
        command.extend_from_slice(&[1, 0xAA, 1, 0xBB, 3, 1, 2, 3]);
        assert!(matches!(
            ServerMessage::parse(&command),
            Err(Error::Queue(QueueError::MalformedIds(_)))
        ));
    }

    #[test]
    fn test_parse_simple_responses() {
        assert_eq!(ServerMessage::parse(b"OK").unwrap(), ServerMessage::Ok);
        assert_eq!(ServerMessage::parse(b"END").unwrap(), ServerMessage::End);
        assert_eq!(
            ServerMessage::parse(b"ERR AUTH").unwrap(),
            ServerMessage::Err("AUTH".to_string())
        );
        assert!(matches!(
            ServerMessage::parse(b"PONG"),
            Err(Error::Parse(ParseError::UnexpectedCommand(_)))
        ));
    }

    #[test]
    fn test_parse_msg() {
        let mut command = b"MSG ".to_vec();
        command.push(3);
        command.extend_from_slice(b"id1");
        command.extend_from_slice(b"encrypted");
        assert_eq!(
            ServerMessage::parse(&command).unwrap(),
            ServerMessage::Msg {
                msg_id: b"id1".to_vec(),
                body: b"encrypted".to_vec()
            }
        );
    }

    #[test]
    fn test_response_block_roundtrip() {
        let block = encode_response_block(
            &[7u8; 32],
            &[
                (&[1u8; 24][..], &b"q1"[..], b"OK".to_vec()),
                (&[][..], &b"q2"[..], b"END".to_vec()),
            ],
        )
        .unwrap();
        let parsed = parse_response_block(&block).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].corr_id, vec![1u8; 24]);
        assert_eq!(parsed[0].message, ServerMessage::Ok);
        assert!(parsed[1].corr_id.is_empty());
        assert_eq!(parsed[1].entity_id, b"q2");
        assert_eq!(parsed[1].message, ServerMessage::End);
    }

    #[test]
    fn test_truncated_response_block() {
        let block = encode_response_block(&[7u8; 32], &[(&[1u8; 24][..], &b"q"[..], b"OK".to_vec())])
            .unwrap();
        assert!(matches!(
            parse_response_block(&block[..20]),
            Err(Error::Parse(ParseError::TruncatedResponse { .. }))
        ));
    }
}
