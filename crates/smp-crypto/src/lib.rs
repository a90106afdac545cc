//! # SMP Crypto
//!
//! Cryptographic primitives for the SimpleX Messaging Protocol client.
//!
//! This crate provides:
//! - X25519 / X448 Diffie-Hellman and Ed25519 signatures
//! - NaCl `crypto_box` for queue-level and client-level envelopes
//! - AES-256-GCM with 12 or 16 byte IVs for the Double Ratchet
//! - SPKI (SubjectPublicKeyInfo) key wrapping as used on the wire
//! - X3DH key agreement and the header-encrypted Double Ratchet
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm | Used by |
//! |----------|-----------|---------|
//! | Command auth | Ed25519 | NEW/SUB/DEL/ACK signatures |
//! | Queue envelopes | X25519 + XSalsa20-Poly1305 | server and client message boxes |
//! | Key agreement | X448 (3-DH) | X3DH, ratchet steps |
//! | Ratchet AEAD | AES-256-GCM | headers and payloads |
//! | KDF | HKDF-SHA512 | root / chain derivation |
//! | Hash | SHA-256 | server key hash, message hash chain |

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aead;
pub mod error;
pub mod hash;
pub mod nacl_box;
pub mod random;
pub mod ratchet;
pub mod signatures;
pub mod spki;
pub mod x25519;
pub mod x3dh;
pub mod x448;

pub use error::{CryptoError, RatchetError};

/// X25519 public key size
pub const X25519_PUBLIC_KEY_SIZE: usize = 32;

/// X25519 secret key size
pub const X25519_SECRET_KEY_SIZE: usize = 32;

/// X448 public key size
pub const X448_PUBLIC_KEY_SIZE: usize = 56;

/// X448 secret key size
pub const X448_SECRET_KEY_SIZE: usize = 56;

/// Ed25519 public key size
pub const ED25519_PUBLIC_KEY_SIZE: usize = 32;

/// Ed25519 keypair size (seed followed by public key)
pub const ED25519_KEYPAIR_SIZE: usize = 64;

/// Ed25519 signature size
pub const ED25519_SIGNATURE_SIZE: usize = 64;

/// NaCl box nonce size
pub const BOX_NONCE_SIZE: usize = 24;

/// Poly1305 / GCM authentication tag size
pub const AUTH_TAG_SIZE: usize = 16;
