//! SubjectPublicKeyInfo (SPKI) key wrapping.
//!
//! Public keys travel on the wire as DER SPKI blobs: a fixed 12-byte
//! ASN.1 prefix followed by the raw key.
//!
//! | Algorithm | Header | Total |
//! |-----------|--------|-------|
//! | Ed25519 | `302a300506032b6570032100` | 44 |
//! | X25519 | `302a300506032b656e032100` | 44 |
//! | X448 | `3042300506032b656f033900` | 68 |

use crate::CryptoError;

/// Length of every SPKI header handled here
pub const SPKI_HEADER_LEN: usize = 12;

/// Ed25519 SPKI header
pub const ED25519_SPKI_HEADER: [u8; SPKI_HEADER_LEN] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];

/// X25519 SPKI header
pub const X25519_SPKI_HEADER: [u8; SPKI_HEADER_LEN] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x6e, 0x03, 0x21, 0x00,
];

/// X448 SPKI header
pub const X448_SPKI_HEADER: [u8; SPKI_HEADER_LEN] = [
    0x30, 0x42, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x6f, 0x03, 0x39, 0x00,
];

/// Key algorithm carried in an SPKI blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    /// Ed25519 signature key
    Ed25519,
    /// X25519 DH key
    X25519,
    /// X448 DH key
    X448,
}

impl KeyAlgorithm {
    /// Fixed SPKI header for this algorithm
    #[must_use]
    pub fn header(self) -> &'static [u8; SPKI_HEADER_LEN] {
        match self {
            Self::Ed25519 => &ED25519_SPKI_HEADER,
            Self::X25519 => &X25519_SPKI_HEADER,
            Self::X448 => &X448_SPKI_HEADER,
        }
    }

    /// Raw key length
    #[must_use]
    pub fn key_len(self) -> usize {
        match self {
            Self::Ed25519 | Self::X25519 => 32,
            Self::X448 => 56,
        }
    }

    /// Total encoded SPKI length (44 or 68)
    #[must_use]
    pub fn encoded_len(self) -> usize {
        SPKI_HEADER_LEN + self.key_len()
    }
}

/// Wrap a raw public key in its SPKI header.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKeyLength`] if `raw` does not have the
/// algorithm's key length.
pub fn encode_spki(algorithm: KeyAlgorithm, raw: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if raw.len() != algorithm.key_len() {
        return Err(CryptoError::InvalidKeyLength {
            expected: algorithm.key_len(),
            actual: raw.len(),
        });
    }
    let mut out = Vec::with_capacity(algorithm.encoded_len());
    out.extend_from_slice(algorithm.header());
    out.extend_from_slice(raw);
    Ok(out)
}

/// Strip the SPKI header and return the raw key bytes.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidSpki`] if the length or header does not
/// match `algorithm`.
pub fn decode_spki(algorithm: KeyAlgorithm, encoded: &[u8]) -> Result<&[u8], CryptoError> {
    if encoded.len() != algorithm.encoded_len() || !encoded.starts_with(algorithm.header()) {
        return Err(CryptoError::InvalidSpki {
            expected: algorithm.encoded_len(),
            actual: encoded.len(),
        });
    }
    Ok(&encoded[SPKI_HEADER_LEN..])
}

/// Find the first offset of the algorithm's SPKI header in `haystack`.
#[must_use]
pub fn find_spki_header(algorithm: KeyAlgorithm, haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(SPKI_HEADER_LEN)
        .position(|window| window == algorithm.header())
}
