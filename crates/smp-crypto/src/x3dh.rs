//! X3DH key agreement over X448.
//!
//! Each party holds two X448 keypairs (`key1` long-term, `key2` ephemeral).
//! The joining party (sender) computes
//!
//! ```text
//! dh1 = DH(our_key2, peer_key1)
//! dh2 = DH(our_key1, peer_key2)
//! dh3 = DH(our_key2, peer_key2)
//! HKDF-SHA512(salt = 0^64, ikm = dh1 || dh2 || dh3, info = "SimpleXX3DH", 96)
//!     = header_key || next_header_key || root_key
//! ```
//!
//! The accepting party mirrors the DH pairs so both sides derive the same
//! output. `assoc_data` is always `sender_key1 || receiver_key1`.

use crate::hash::hkdf_sha512;
use crate::x448::{PrivateKey, PublicKey, SharedSecret};
use crate::{RatchetError, X448_PUBLIC_KEY_SIZE};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// HKDF info string for X3DH
pub const X3DH_INFO: &[u8] = b"SimpleXX3DH";

/// Associated data length (two X448 public keys)
pub const ASSOC_DATA_LEN: usize = 2 * X448_PUBLIC_KEY_SIZE;

/// Output of a completed X3DH agreement.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct X3dhOutput {
    /// Header key of the sender's first sending chain
    pub header_key: [u8; 32],
    /// Header key the sender expects on the first reply chain
    pub next_header_key: [u8; 32],
    /// Initial root key
    pub root_key: [u8; 32],
    /// `sender_key1 || receiver_key1`
    pub assoc_data: [u8; ASSOC_DATA_LEN],
}

fn dh(ours: &PrivateKey, theirs: &PublicKey) -> Result<SharedSecret, RatchetError> {
    ours.exchange(theirs).ok_or(RatchetError::X3dhFailed)
}

fn derive(
    dhs: [SharedSecret; 3],
    sender_key1: &PublicKey,
    receiver_key1: &PublicKey,
) -> Result<X3dhOutput, RatchetError> {
    let mut ikm = [0u8; 3 * 56];
    for (chunk, secret) in ikm.chunks_exact_mut(56).zip(dhs.iter()) {
        chunk.copy_from_slice(secret.as_bytes());
    }

    let mut okm = [0u8; 96];
    let result = hkdf_sha512(Some(&[0u8; 64]), &ikm, X3DH_INFO, &mut okm);
    ikm.zeroize();
    result.map_err(|_| RatchetError::X3dhFailed)?;

    let mut out = X3dhOutput {
        header_key: [0u8; 32],
        next_header_key: [0u8; 32],
        root_key: [0u8; 32],
        assoc_data: [0u8; ASSOC_DATA_LEN],
    };
    out.header_key.copy_from_slice(&okm[..32]);
    out.next_header_key.copy_from_slice(&okm[32..64]);
    out.root_key.copy_from_slice(&okm[64..]);
    okm.zeroize();

    out.assoc_data[..X448_PUBLIC_KEY_SIZE].copy_from_slice(sender_key1.as_bytes());
    out.assoc_data[X448_PUBLIC_KEY_SIZE..].copy_from_slice(receiver_key1.as_bytes());
    Ok(out)
}

/// Run X3DH as the joining party.
///
/// # Errors
///
/// Returns [`RatchetError::X3dhFailed`] if any DH yields a low-order result.
pub fn x3dh_sender(
    our_key1: &PrivateKey,
    our_key2: &PrivateKey,
    peer_key1: &PublicKey,
    peer_key2: &PublicKey,
) -> Result<X3dhOutput, RatchetError> {
    let dh1 = dh(our_key2, peer_key1)?;
    let dh2 = dh(our_key1, peer_key2)?;
    let dh3 = dh(our_key2, peer_key2)?;
    let our_public1 = our_key1.public_key()?;
    derive([dh1, dh2, dh3], &our_public1, peer_key1)
}

/// Run X3DH as the accepting party (the invitation owner).
///
/// # Errors
///
/// Returns [`RatchetError::X3dhFailed`] if any DH yields a low-order result.
pub fn x3dh_receiver(
    our_key1: &PrivateKey,
    our_key2: &PrivateKey,
    peer_key1: &PublicKey,
    peer_key2: &PublicKey,
) -> Result<X3dhOutput, RatchetError> {
    let dh1 = dh(our_key1, peer_key2)?;
    let dh2 = dh(our_key2, peer_key1)?;
    let dh3 = dh(our_key2, peer_key2)?;
    let our_public1 = our_key1.public_key()?;
    derive([dh1, dh2, dh3], peer_key1, &our_public1)
}
