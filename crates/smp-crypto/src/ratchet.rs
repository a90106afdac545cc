//! Header-encrypted Double Ratchet over X448 and AES-256-GCM.
//!
//! ## Key schedule
//!
//! ```text
//! kdf_root(rk, dh)  = HKDF-SHA512(salt = rk, ikm = dh, "SimpleXRootRatchet", 96)
//!                   = rk' || chain_key || next_header_key
//! kdf_chain(ck)     = HKDF-SHA512(salt = none, ikm = ck, "SimpleXChainRatchet", 96)
//!                   = ck' || message_key || header_iv(16) || msg_iv(16)
//! ```
//!
//! ## Wire layout
//!
//! ```text
//! header (88)    = [ver u16][68][SPKI X448 dh][pn u32][ns u32][0..]
//! emHeader (123) = [ver u16][header_iv 16][tag 16][88][AES-GCM(header)]
//! message        = [123][emHeader][payload tag 16][AES-GCM(padded payload)]
//! ```
//!
//! The header is sealed with `assoc_data` (112 bytes) as AAD, the payload
//! with `assoc_data || emHeader` (235 bytes). Decryption uses the same AAD
//! on both layers.
//!
//! A failed decrypt leaves the state untouched; chain keys only move
//! forward once a message authenticates.

use crate::aead::AeadKey;
use crate::hash::hkdf_sha512;
use crate::spki::{KeyAlgorithm, decode_spki, encode_spki};
use crate::x3dh::{ASSOC_DATA_LEN, X3dhOutput, x3dh_receiver, x3dh_sender};
use crate::x448::{PrivateKey, PublicKey};
use crate::{AUTH_TAG_SIZE, RatchetError};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Current ratchet header version
pub const RATCHET_VERSION: u16 = 2;

/// Plaintext message header length
pub const MSG_HEADER_LEN: usize = 88;

/// Encrypted header block length
pub const EM_HEADER_LEN: usize = 123;

/// Fixed overhead of [`RatchetState::encrypt`] on top of the padded length
pub const ENCRYPTION_OVERHEAD: usize = 1 + EM_HEADER_LEN + AUTH_TAG_SIZE;

/// Maximum number of skipped message keys retained, and the largest gap a
/// single message may skip. The oldest keys are evicted past this bound.
pub const MAX_SKIP: usize = 512;

const ROOT_INFO: &[u8] = b"SimpleXRootRatchet";
const CHAIN_INFO: &[u8] = b"SimpleXChainRatchet";
const PAD_BYTE: u8 = b'#';
const IV_LEN: usize = 16;

/// Chain key for symmetric ratcheting
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ChainKey([u8; 32]);

impl ChainKey {
    /// Create from raw bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derive the next chain key and this step's message keys.
    ///
    /// # Errors
    ///
    /// Returns [`RatchetError::Crypto`] if HKDF fails.
    pub fn step(&self) -> Result<(ChainKey, MessageKeys), RatchetError> {
        let mut okm = Zeroizing::new([0u8; 96]);
        hkdf_sha512(None, &self.0, CHAIN_INFO, &mut okm[..])?;

        let mut next = [0u8; 32];
        let mut keys = MessageKeys {
            message_key: [0u8; 32],
            header_iv: [0u8; IV_LEN],
            msg_iv: [0u8; IV_LEN],
        };
        next.copy_from_slice(&okm[..32]);
        keys.message_key.copy_from_slice(&okm[32..64]);
        keys.header_iv.copy_from_slice(&okm[64..80]);
        keys.msg_iv.copy_from_slice(&okm[80..96]);
        Ok((ChainKey(next), keys))
    }
}

/// Per-message keys derived from a chain step
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MessageKeys {
    message_key: [u8; 32],
    header_iv: [u8; IV_LEN],
    msg_iv: [u8; IV_LEN],
}

impl MessageKeys {
    /// Payload encryption key
    #[must_use]
    pub fn message_key(&self) -> &[u8; 32] {
        &self.message_key
    }
}

/// Plaintext ratchet header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    /// Sender's current ratchet public key
    pub dh: PublicKey,
    /// Length of the sender's previous sending chain
    pub prev_chain_len: u32,
    /// Message number within the current sending chain
    pub msg_num: u32,
}

impl MessageHeader {
    /// Encode into the fixed 88-byte header.
    ///
    /// # Errors
    ///
    /// Returns [`RatchetError::Crypto`] if the key cannot be SPKI encoded.
    pub fn encode(&self) -> Result<[u8; MSG_HEADER_LEN], RatchetError> {
        let spki = encode_spki(KeyAlgorithm::X448, self.dh.as_bytes())?;
        let mut out = [0u8; MSG_HEADER_LEN];
        out[..2].copy_from_slice(&RATCHET_VERSION.to_be_bytes());
        out[2] = KeyAlgorithm::X448.encoded_len() as u8;
        out[3..71].copy_from_slice(&spki);
        out[71..75].copy_from_slice(&self.prev_chain_len.to_be_bytes());
        out[75..79].copy_from_slice(&self.msg_num.to_be_bytes());
        Ok(out)
    }

    /// Decode a decrypted header.
    ///
    /// # Errors
    ///
    /// Returns [`RatchetError::InvalidHeaderLength`] for short or malformed
    /// headers and [`RatchetError::UnsupportedVersion`] for unknown versions.
    pub fn decode(bytes: &[u8]) -> Result<Self, RatchetError> {
        if bytes.len() < 79 {
            return Err(RatchetError::InvalidHeaderLength(bytes.len()));
        }
        let version = u16::from_be_bytes([bytes[0], bytes[1]]);
        if version == 0 || version > RATCHET_VERSION {
            return Err(RatchetError::UnsupportedVersion(version));
        }
        let key_len = bytes[2] as usize;
        if key_len != KeyAlgorithm::X448.encoded_len() {
            return Err(RatchetError::InvalidHeaderLength(key_len));
        }
        let raw = decode_spki(KeyAlgorithm::X448, &bytes[3..71])?;
        let dh = PublicKey::from_slice(raw)?;
        let prev_chain_len = u32::from_be_bytes([bytes[71], bytes[72], bytes[73], bytes[74]]);
        let msg_num = u32::from_be_bytes([bytes[75], bytes[76], bytes[77], bytes[78]]);
        Ok(Self {
            dh,
            prev_chain_len,
            msg_num,
        })
    }
}

/// Borrowed view of an encrypted ratchet message
struct EncryptedMessage<'a> {
    em_header: &'a [u8],
    header_iv: &'a [u8],
    header_tag: [u8; AUTH_TAG_SIZE],
    header_body: &'a [u8],
    payload_tag: [u8; AUTH_TAG_SIZE],
    payload: &'a [u8],
}

impl<'a> EncryptedMessage<'a> {
    fn parse(message: &'a [u8]) -> Result<Self, RatchetError> {
        if message.len() < ENCRYPTION_OVERHEAD {
            return Err(RatchetError::InvalidHeaderLength(message.len()));
        }
        if message[0] as usize != EM_HEADER_LEN {
            return Err(RatchetError::InvalidHeaderLength(message[0] as usize));
        }
        let em_header = &message[1..1 + EM_HEADER_LEN];
        let version = u16::from_be_bytes([em_header[0], em_header[1]]);
        if version == 0 || version > RATCHET_VERSION {
            return Err(RatchetError::UnsupportedVersion(version));
        }
        if em_header[34] as usize != MSG_HEADER_LEN {
            return Err(RatchetError::InvalidHeaderLength(em_header[34] as usize));
        }

        let mut header_tag = [0u8; AUTH_TAG_SIZE];
        header_tag.copy_from_slice(&em_header[18..34]);
        let mut payload_tag = [0u8; AUTH_TAG_SIZE];
        payload_tag.copy_from_slice(&message[1 + EM_HEADER_LEN..ENCRYPTION_OVERHEAD]);

        Ok(Self {
            em_header,
            header_iv: &em_header[2..18],
            header_tag,
            header_body: &em_header[35..],
            payload_tag,
            payload: &message[ENCRYPTION_OVERHEAD..],
        })
    }

    fn decrypt_header(
        &self,
        header_key: &[u8; 32],
        assoc_data: &[u8],
    ) -> Result<MessageHeader, RatchetError> {
        let plain = Zeroizing::new(
            AeadKey::new(*header_key)
                .open(self.header_iv, assoc_data, self.header_body, &self.header_tag)
                .map_err(|_| RatchetError::AeadOpenFailed)?,
        );
        MessageHeader::decode(&plain)
    }
}

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
struct SkippedKey {
    header_key: [u8; 32],
    msg_num: u32,
    keys: MessageKeys,
}

fn kdf_root(
    root_key: &[u8; 32],
    ours: &PrivateKey,
    theirs: &PublicKey,
) -> Result<([u8; 32], ChainKey, [u8; 32]), RatchetError> {
    let dh_out = ours.exchange(theirs).ok_or(RatchetError::X3dhFailed)?;
    let mut okm = Zeroizing::new([0u8; 96]);
    hkdf_sha512(Some(root_key), dh_out.as_bytes(), ROOT_INFO, &mut okm[..])?;

    let mut root = [0u8; 32];
    let mut chain = [0u8; 32];
    let mut next_header = [0u8; 32];
    root.copy_from_slice(&okm[..32]);
    chain.copy_from_slice(&okm[32..64]);
    next_header.copy_from_slice(&okm[64..]);
    Ok((root, ChainKey(chain), next_header))
}

/// Pad a plaintext as `[len u64BE][plaintext]['#'...]` to `padded_len`.
///
/// # Errors
///
/// Returns [`RatchetError::MessageTooLarge`] if `plaintext.len() + 8 > padded_len`.
pub fn pad_message(plaintext: &[u8], padded_len: usize) -> Result<Zeroizing<Vec<u8>>, RatchetError> {
    if plaintext.len() + 8 > padded_len {
        return Err(RatchetError::MessageTooLarge {
            len: plaintext.len(),
            padded_len,
        });
    }
    let mut out = Zeroizing::new(Vec::with_capacity(padded_len));
    out.extend_from_slice(&(plaintext.len() as u64).to_be_bytes());
    out.extend_from_slice(plaintext);
    out.resize(padded_len, PAD_BYTE);
    Ok(out)
}

/// Remove [`pad_message`] padding.
///
/// # Errors
///
/// Returns [`RatchetError::InvalidPadding`] if the length prefix overruns the buffer.
pub fn unpad_message(padded: &[u8]) -> Result<Vec<u8>, RatchetError> {
    if padded.len() < 8 {
        return Err(RatchetError::InvalidPadding);
    }
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&padded[..8]);
    let len = u64::from_be_bytes(len_bytes);
    if len > (padded.len() - 8) as u64 {
        return Err(RatchetError::InvalidPadding);
    }
    Ok(padded[8..8 + len as usize].to_vec())
}

/// One Double Ratchet session.
///
/// Each peer connection owns its own instance.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RatchetState {
    root_key: [u8; 32],
    header_key_send: Option<[u8; 32]>,
    header_key_recv: Option<[u8; 32]>,
    next_header_key_send: [u8; 32],
    next_header_key_recv: [u8; 32],
    chain_key_send: Option<ChainKey>,
    chain_key_recv: Option<ChainKey>,
    dh_self: PrivateKey,
    #[zeroize(skip)]
    dh_peer: Option<PublicKey>,
    msg_num_send: u32,
    msg_num_recv: u32,
    prev_chain_len: u32,
    assoc_data: [u8; ASSOC_DATA_LEN],
    skipped: Vec<SkippedKey>,
}

impl RatchetState {
    /// Initialize as the joining party: run X3DH and one sending DH step.
    ///
    /// `our_key2` becomes the first ratchet key and `peer_key2` the peer's
    /// initial ratchet key.
    ///
    /// # Errors
    ///
    /// Returns [`RatchetError::X3dhFailed`] on invalid peer keys.
    pub fn init_sender(
        our_key1: &PrivateKey,
        our_key2: &PrivateKey,
        peer_key1: &PublicKey,
        peer_key2: &PublicKey,
    ) -> Result<Self, RatchetError> {
        let x3dh = x3dh_sender(our_key1, our_key2, peer_key1, peer_key2)?;
        let (root_key, chain_send, next_header_send) = kdf_root(&x3dh.root_key, our_key2, peer_key2)?;

        Ok(Self {
            root_key,
            header_key_send: Some(x3dh.header_key),
            header_key_recv: None,
            next_header_key_send: next_header_send,
            next_header_key_recv: x3dh.next_header_key,
            chain_key_send: Some(chain_send),
            chain_key_recv: None,
            dh_self: our_key2.clone(),
            dh_peer: Some(*peer_key2),
            msg_num_send: 0,
            msg_num_recv: 0,
            prev_chain_len: 0,
            assoc_data: x3dh.assoc_data,
            skipped: Vec::new(),
        })
    }

    /// Initialize as the accepting party. Sending becomes possible after
    /// the first message from the joining party is decrypted.
    ///
    /// # Errors
    ///
    /// Returns [`RatchetError::X3dhFailed`] on invalid peer keys.
    pub fn init_receiver(
        our_key1: &PrivateKey,
        our_key2: &PrivateKey,
        peer_key1: &PublicKey,
        peer_key2: &PublicKey,
    ) -> Result<Self, RatchetError> {
        let x3dh: X3dhOutput = x3dh_receiver(our_key1, our_key2, peer_key1, peer_key2)?;

        Ok(Self {
            root_key: x3dh.root_key,
            header_key_send: None,
            header_key_recv: None,
            next_header_key_send: x3dh.next_header_key,
            next_header_key_recv: x3dh.header_key,
            chain_key_send: None,
            chain_key_recv: None,
            dh_self: our_key2.clone(),
            dh_peer: None,
            msg_num_send: 0,
            msg_num_recv: 0,
            prev_chain_len: 0,
            assoc_data: x3dh.assoc_data,
            skipped: Vec::new(),
        })
    }

    /// Associated data fixed at X3DH time
    #[must_use]
    pub fn assoc_data(&self) -> &[u8; ASSOC_DATA_LEN] {
        &self.assoc_data
    }

    /// Messages sent on the current sending chain
    #[must_use]
    pub fn msg_num_send(&self) -> u32 {
        self.msg_num_send
    }

    /// Messages received on the current receiving chain
    #[must_use]
    pub fn msg_num_recv(&self) -> u32 {
        self.msg_num_recv
    }

    /// Length of the previous sending chain
    #[must_use]
    pub fn prev_chain_len(&self) -> u32 {
        self.prev_chain_len
    }

    /// Whether a sending chain exists
    #[must_use]
    pub fn can_send(&self) -> bool {
        self.chain_key_send.is_some() && self.header_key_send.is_some()
    }

    /// Encrypt `plaintext` padded to `padded_len`.
    ///
    /// Output is always `1 + 123 + 16 + padded_len` bytes.
    ///
    /// # Errors
    ///
    /// - [`RatchetError::NotInitialized`] without a sending chain
    /// - [`RatchetError::MessageTooLarge`] if the plaintext does not fit
    /// - [`RatchetError::AeadSealFailed`] on cipher failure
    pub fn encrypt(&mut self, plaintext: &[u8], padded_len: usize) -> Result<Vec<u8>, RatchetError> {
        let chain = self
            .chain_key_send
            .as_ref()
            .ok_or(RatchetError::NotInitialized)?;
        let header_key = AeadKey::new(self.header_key_send.ok_or(RatchetError::NotInitialized)?);
        let padded = pad_message(plaintext, padded_len)?;
        let (next_chain, keys) = chain.step()?;

        let header = Zeroizing::new(
            MessageHeader {
                dh: self.dh_self.public_key()?,
                prev_chain_len: self.prev_chain_len,
                msg_num: self.msg_num_send,
            }
            .encode()?,
        );
        let (enc_header, header_tag) = header_key
            .seal(&keys.header_iv, &self.assoc_data, &header[..])
            .map_err(|_| RatchetError::AeadSealFailed)?;

        let mut em_header = Vec::with_capacity(EM_HEADER_LEN);
        em_header.extend_from_slice(&RATCHET_VERSION.to_be_bytes());
        em_header.extend_from_slice(&keys.header_iv);
        em_header.extend_from_slice(&header_tag);
        em_header.push(MSG_HEADER_LEN as u8);
        em_header.extend_from_slice(&enc_header);

        let mut aad = Vec::with_capacity(ASSOC_DATA_LEN + EM_HEADER_LEN);
        aad.extend_from_slice(&self.assoc_data);
        aad.extend_from_slice(&em_header);

        let (ciphertext, payload_tag) = AeadKey::new(keys.message_key)
            .seal(&keys.msg_iv, &aad, &padded)
            .map_err(|_| RatchetError::AeadSealFailed)?;

        let mut out = Vec::with_capacity(ENCRYPTION_OVERHEAD + ciphertext.len());
        out.push(EM_HEADER_LEN as u8);
        out.extend_from_slice(&em_header);
        out.extend_from_slice(&payload_tag);
        out.extend_from_slice(&ciphertext);

        self.chain_key_send = Some(next_chain);
        self.msg_num_send += 1;
        Ok(out)
    }

    /// Decrypt a message produced by the peer's [`RatchetState::encrypt`].
    ///
    /// On any error the state is left exactly as before the call.
    ///
    /// # Errors
    ///
    /// - [`RatchetError::AeadOpenFailed`] if neither header key nor the payload authenticates
    /// - [`RatchetError::DuplicateMessage`] for an already consumed message number
    /// - [`RatchetError::TooManySkipped`] if the gap exceeds [`MAX_SKIP`]
    pub fn decrypt(&mut self, message: &[u8]) -> Result<Vec<u8>, RatchetError> {
        let parsed = EncryptedMessage::parse(message)?;
        let mut next = self.clone();
        let keys = next.message_keys_for(&parsed)?;

        let mut aad = Vec::with_capacity(ASSOC_DATA_LEN + EM_HEADER_LEN);
        aad.extend_from_slice(&next.assoc_data);
        aad.extend_from_slice(parsed.em_header);

        let padded = Zeroizing::new(
            AeadKey::new(keys.message_key)
                .open(&keys.msg_iv, &aad, parsed.payload, &parsed.payload_tag)
                .map_err(|_| RatchetError::AeadOpenFailed)?,
        );
        let plaintext = unpad_message(&padded)?;

        *self = next;
        Ok(plaintext)
    }

    fn message_keys_for(&mut self, msg: &EncryptedMessage<'_>) -> Result<MessageKeys, RatchetError> {
        if let Some(keys) = self.take_skipped(msg) {
            return Ok(keys);
        }

        if let Some(header_key) = self.header_key_recv {
            if let Ok(header) = msg.decrypt_header(&header_key, &self.assoc_data) {
                return self.receive_chain_keys(header.msg_num);
            }
        }

        let header = msg.decrypt_header(&self.next_header_key_recv, &self.assoc_data)?;
        self.skip_message_keys(header.prev_chain_len)?;
        self.dh_ratchet_step(&header.dh)?;
        self.receive_chain_keys(header.msg_num)
    }

    fn take_skipped(&mut self, msg: &EncryptedMessage<'_>) -> Option<MessageKeys> {
        let position = self.skipped.iter().position(|entry| {
            msg.decrypt_header(&entry.header_key, &self.assoc_data)
                .is_ok_and(|header| header.msg_num == entry.msg_num)
        })?;
        let entry = self.skipped.remove(position);
        Some(entry.keys.clone())
    }

    fn receive_chain_keys(&mut self, msg_num: u32) -> Result<MessageKeys, RatchetError> {
        if msg_num < self.msg_num_recv {
            return Err(RatchetError::DuplicateMessage(msg_num));
        }
        self.skip_message_keys(msg_num)?;
        let chain = self
            .chain_key_recv
            .as_ref()
            .ok_or(RatchetError::NotInitialized)?;
        let (next_chain, keys) = chain.step()?;
        self.chain_key_recv = Some(next_chain);
        self.msg_num_recv += 1;
        Ok(keys)
    }

    fn skip_message_keys(&mut self, until: u32) -> Result<(), RatchetError> {
        let (Some(header_key), Some(mut chain)) = (self.header_key_recv, self.chain_key_recv.clone())
        else {
            return Ok(());
        };
        if until <= self.msg_num_recv {
            return Ok(());
        }
        if (until - self.msg_num_recv) as usize > MAX_SKIP {
            return Err(RatchetError::TooManySkipped);
        }
        while self.msg_num_recv < until {
            let (next_chain, keys) = chain.step()?;
            self.skipped.push(SkippedKey {
                header_key,
                msg_num: self.msg_num_recv,
                keys,
            });
            chain = next_chain;
            self.msg_num_recv += 1;
        }
        self.chain_key_recv = Some(chain);

        // Oldest first; dropped entries zeroize themselves
        if self.skipped.len() > MAX_SKIP {
            let excess = self.skipped.len() - MAX_SKIP;
            self.skipped.drain(..excess);
        }
        Ok(())
    }

    fn dh_ratchet_step(&mut self, peer_dh: &PublicKey) -> Result<(), RatchetError> {
        self.prev_chain_len = self.msg_num_send;
        self.msg_num_send = 0;
        self.msg_num_recv = 0;
        self.header_key_send = Some(self.next_header_key_send);
        self.header_key_recv = Some(self.next_header_key_recv);
        self.dh_peer = Some(*peer_dh);

        let (root_key, chain_recv, next_header_recv) = kdf_root(&self.root_key, &self.dh_self, peer_dh)?;
        self.root_key = root_key;
        self.chain_key_recv = Some(chain_recv);
        self.next_header_key_recv = next_header_recv;

        self.dh_self = PrivateKey::generate()?;
        let (root_key, chain_send, next_header_send) = kdf_root(&self.root_key, &self.dh_self, peer_dh)?;
        self.root_key = root_key;
        self.chain_key_send = Some(chain_send);
        self.next_header_key_send = next_header_send;
        Ok(())
    }
}

impl std::fmt::Debug for RatchetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RatchetState")
            .field("msg_num_send", &self.msg_num_send)
            .field("msg_num_recv", &self.msg_num_recv)
            .field("prev_chain_len", &self.prev_chain_len)
            .field("can_send", &self.can_send())
            .field("skipped", &self.skipped.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair() -> (PrivateKey, PublicKey) {
        let private = PrivateKey::generate().unwrap();
        let public = private.public_key().unwrap();
        (private, public)
    }

    fn session_pair() -> (RatchetState, RatchetState) {
        let (s1, s1_pub) = keypair();
        let (s2, s2_pub) = keypair();
        let (r1, r1_pub) = keypair();
        let (r2, r2_pub) = keypair();
        let sender = RatchetState::init_sender(&s1, &s2, &r1_pub, &r2_pub).unwrap();
        let receiver = RatchetState::init_receiver(&r1, &r2, &s1_pub, &s2_pub).unwrap();
        (sender, receiver)
    }

    #[test]
    fn test_chain_step_produces_different_keys() {
        let chain = ChainKey::from_bytes([0x42u8; 32]);
        let (next, keys1) = chain.step().unwrap();
        let (_, keys2) = next.step().unwrap();
        assert_ne!(keys1.message_key(), keys2.message_key());
    }

    #[test]
    fn test_header_roundtrip() {
        let (_, public) = keypair();
        let header = MessageHeader {
            dh: public,
            prev_chain_len: 3,
            msg_num: 9,
        };
        let encoded = header.encode().unwrap();
        assert_eq!(&encoded[..3], &[0, 2, 68]);
        assert!(encoded[79..].iter().all(|&b| b == 0));
        assert_eq!(MessageHeader::decode(&encoded).unwrap(), header);
    }

    #[test]
    fn test_padding_roundtrip() {
        let padded = pad_message(b"hello", 32).unwrap();
        assert_eq!(padded.len(), 32);
        assert_eq!(&padded[..8], &5u64.to_be_bytes());
        assert!(padded[13..].iter().all(|&b| b == b'#'));
        assert_eq!(unpad_message(&padded).unwrap(), b"hello");
    }

    #[test]
    fn test_padding_too_small() {
        assert!(matches!(
            pad_message(&[0u8; 25], 32),
            Err(RatchetError::MessageTooLarge { len: 25, padded_len: 32 })
        ));
        assert!(pad_message(&[0u8; 24], 32).is_ok());
    }

    #[test]
    fn test_encrypt_output_length() {
        let (mut sender, _) = session_pair();
        let out = sender.encrypt(b"HELLO", 15840).unwrap();
        assert_eq!(out.len(), 1 + 123 + 16 + 15840);
        assert_eq!(out[0], 123);
        assert_eq!(&out[1..3], &[0, 2]);
        assert_eq!(out[1 + 34], 88);
        assert_eq!(sender.msg_num_send(), 1);
    }

    #[test]
    fn test_receiver_cannot_send_before_first_message() {
        let (_, mut receiver) = session_pair();
        assert!(!receiver.can_send());
        assert_eq!(
            receiver.encrypt(b"x", 64).unwrap_err(),
            RatchetError::NotInitialized
        );
    }

    #[test]
    fn test_sender_to_receiver() {
        let (mut sender, mut receiver) = session_pair();
        let ct = sender.encrypt(b"first", 256).unwrap();
        assert_eq!(receiver.decrypt(&ct).unwrap(), b"first");
        assert!(receiver.can_send());
    }

    #[test]
    fn test_bidirectional_with_ratchet_steps() {
        let (mut alice, mut bob) = session_pair();

        for round in 0..3u8 {
            let msg = [b'a', round];
            let ct = alice.encrypt(&msg, 128).unwrap();
            assert_eq!(bob.decrypt(&ct).unwrap(), msg);

            let reply = [b'b', round];
            let ct = bob.encrypt(&reply, 128).unwrap();
            assert_eq!(alice.decrypt(&ct).unwrap(), reply);
        }
    }

    #[test]
    fn test_prev_chain_len_recorded_after_step() {
        let (mut alice, mut bob) = session_pair();
        for _ in 0..3 {
            let ct = alice.encrypt(b"m", 64).unwrap();
            bob.decrypt(&ct).unwrap();
        }
        let ct = bob.encrypt(b"r", 64).unwrap();
        alice.decrypt(&ct).unwrap();
        assert_eq!(alice.prev_chain_len(), 3);
        assert_eq!(alice.msg_num_send(), 0);
    }

    #[test]
    fn test_out_of_order_delivery() {
        let (mut alice, mut bob) = session_pair();
        let m0 = alice.encrypt(b"zero", 64).unwrap();
        let m1 = alice.encrypt(b"one", 64).unwrap();
        let m2 = alice.encrypt(b"two", 64).unwrap();

        assert_eq!(bob.decrypt(&m2).unwrap(), b"two");
        assert_eq!(bob.decrypt(&m0).unwrap(), b"zero");
        assert_eq!(bob.decrypt(&m1).unwrap(), b"one");
    }

    #[test]
    fn test_replay_is_rejected() {
        let (mut alice, mut bob) = session_pair();
        let m0 = alice.encrypt(b"once", 64).unwrap();
        let m1 = alice.encrypt(b"twice", 64).unwrap();
        bob.decrypt(&m0).unwrap();
        bob.decrypt(&m1).unwrap();

        assert_eq!(bob.decrypt(&m0).unwrap_err(), RatchetError::DuplicateMessage(0));
        assert!(bob.decrypt(&m1).is_err());
    }

    #[test]
    fn test_failed_decrypt_leaves_state_untouched() {
        let (mut alice, mut bob) = session_pair();
        let mut ct = alice.encrypt(b"payload", 64).unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0x01;

        assert_eq!(bob.decrypt(&ct).unwrap_err(), RatchetError::AeadOpenFailed);
        assert!(!bob.can_send());
        assert_eq!(bob.msg_num_recv(), 0);

        ct[last] ^= 0x01;
        assert_eq!(bob.decrypt(&ct).unwrap(), b"payload");
    }

    #[test]
    fn test_tampered_header_rejected() {
        let (mut alice, mut bob) = session_pair();
        let mut ct = alice.encrypt(b"payload", 64).unwrap();
        ct[40] ^= 0x80;
        assert!(bob.decrypt(&ct).is_err());
    }

    #[test]
    fn test_too_many_skipped() {
        let (mut alice, mut bob) = session_pair();
        let first = alice.encrypt(b"0", 16).unwrap();
        bob.decrypt(&first).unwrap();
        for _ in 0..=MAX_SKIP {
            alice.encrypt(b"gap", 16).unwrap();
        }
        let far = alice.encrypt(b"far", 16).unwrap();
        assert_eq!(bob.decrypt(&far).unwrap_err(), RatchetError::TooManySkipped);
    }

    #[test]
    fn test_lost_messages_do_not_block_the_chain() {
        let (mut alice, mut bob) = session_pair();
        bob.decrypt(&alice.encrypt(b"0", 16).unwrap()).unwrap();

        let oldest_lost = alice.encrypt(b"lost", 16).unwrap();
        for _ in 1..MAX_SKIP {
            alice.encrypt(b"lost", 16).unwrap();
        }
        assert_eq!(bob.decrypt(&alice.encrypt(b"after gap", 16).unwrap()).unwrap(), b"after gap");
        assert!(format!("{bob:?}").contains(&format!("skipped: {MAX_SKIP}")));

        let newest_lost = alice.encrypt(b"late", 16).unwrap();
        let next = alice.encrypt(b"next", 16).unwrap();
        assert_eq!(bob.decrypt(&next).unwrap(), b"next");
        assert!(format!("{bob:?}").contains(&format!("skipped: {MAX_SKIP}")));

        assert_eq!(bob.decrypt(&newest_lost).unwrap(), b"late");
        assert_eq!(
            bob.decrypt(&oldest_lost).unwrap_err(),
            RatchetError::DuplicateMessage(1)
        );
    }

    #[test]
    fn test_short_message_rejected() {
        let (_, mut bob) = session_pair();
        assert!(matches!(
            bob.decrypt(&[123u8; 20]),
            Err(RatchetError::InvalidHeaderLength(20))
        ));
    }

    #[test]
    fn test_unrelated_session_cannot_decrypt() {
        let (mut alice, _) = session_pair();
        let (_, mut other) = session_pair();
        let ct = alice.encrypt(b"secret", 64).unwrap();
        assert_eq!(other.decrypt(&ct).unwrap_err(), RatchetError::AeadOpenFailed);
    }
}
