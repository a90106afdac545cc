//! SHA-256 hashing and HKDF-SHA512 key derivation.
//!
//! SHA-256 derives the server key hash from its certificate and links agent
//! messages into a hash chain. HKDF-SHA512 drives every ratchet derivation.

use crate::CryptoError;
use hkdf::Hkdf;
use sha2::{Digest, Sha256, Sha512};

/// SHA-256 hash output (32 bytes).
pub type HashOutput = [u8; 32];

/// Compute the SHA-256 hash of input data.
#[must_use]
pub fn sha256(data: &[u8]) -> HashOutput {
    Sha256::digest(data).into()
}

/// HKDF-SHA512 extract-then-expand into `out`.
///
/// A `None` salt is treated as a zero-filled salt of hash length (RFC 5869).
///
/// # Errors
///
/// Returns [`CryptoError::KeyDerivationFailed`] if `out` is longer than
/// 255 * 64 bytes.
pub fn hkdf_sha512(
    salt: Option<&[u8]>,
    ikm: &[u8],
    info: &[u8],
    out: &mut [u8],
) -> Result<(), CryptoError> {
    let hk = Hkdf::<Sha512>::new(salt, ikm);
    hk.expand(info, out)
        .map_err(|_| CryptoError::KeyDerivationFailed)
}
