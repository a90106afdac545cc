//! Cryptographic error types.

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// AEAD or box encryption failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// AEAD or box decryption failed (authentication failure)
    #[error("decryption failed: authentication failure")]
    DecryptionFailed,

    /// Invalid key length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Invalid nonce / IV length
    #[error("invalid nonce length: {0}")]
    InvalidNonceLength(usize),

    /// Key derivation failed
    #[error("key derivation failed")]
    KeyDerivationFailed,

    /// Random number generation failed
    #[error("random number generation failed")]
    RandomFailed,

    /// Invalid signature
    #[error("invalid signature")]
    InvalidSignature,

    /// Invalid public key (low order point or malformed)
    #[error("invalid public key")]
    InvalidPublicKey,

    /// SPKI header does not match the expected algorithm
    #[error("invalid SPKI encoding: expected {expected} bytes with matching header, got {actual}")]
    InvalidSpki {
        /// Expected total length
        expected: usize,
        /// Actual length
        actual: usize,
    },
}

/// Double Ratchet errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RatchetError {
    /// Ratchet has no sending or receiving chain yet
    #[error("ratchet not initialized")]
    NotInitialized,

    /// X3DH key agreement failed (invalid peer key)
    #[error("X3DH key agreement failed")]
    X3dhFailed,

    /// AEAD seal failed
    #[error("AEAD seal failed")]
    AeadSealFailed,

    /// AEAD open failed (header or payload)
    #[error("AEAD open failed")]
    AeadOpenFailed,

    /// Encrypted header or message header has the wrong size
    #[error("invalid header length: {0}")]
    InvalidHeaderLength(usize),

    /// Unsupported ratchet version
    #[error("unsupported ratchet version: {0}")]
    UnsupportedVersion(u16),

    /// Plaintext does not fit into the padded length
    #[error("message too large: {len} bytes does not fit padded length {padded_len}")]
    MessageTooLarge {
        /// Plaintext length
        len: usize,
        /// Requested padded length
        padded_len: usize,
    },

    /// Padding prefix is inconsistent with the decrypted payload
    #[error("invalid padding")]
    InvalidPadding,

    /// Message number already consumed
    #[error("duplicate message {0}")]
    DuplicateMessage(u32),

    /// One message skips more message keys than the ratchet retains
    #[error("too many skipped messages")]
    TooManySkipped,

    /// Underlying primitive failure
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}
