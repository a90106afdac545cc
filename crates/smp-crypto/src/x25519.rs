//! X25519 keys for queue and client envelopes.
//!
//! Each queue carries an X25519 key pair whose shared secret with the
//! server's key opens delivered messages; each connection uses another pair
//! for the client envelope box. Public keys travel SPKI-encoded.

use crate::{CryptoError, X25519_PUBLIC_KEY_SIZE, X25519_SECRET_KEY_SIZE};
use crate::spki::{KeyAlgorithm, SPKI_HEADER_LEN, X25519_SPKI_HEADER, decode_spki};
use rand_core::{CryptoRng, RngCore};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// SPKI-encoded X25519 public key length
pub const X25519_SPKI_SIZE: usize = SPKI_HEADER_LEN + X25519_PUBLIC_KEY_SIZE;

/// X25519 private key
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey(x25519_dalek::StaticSecret);

/// X25519 public key
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(x25519_dalek::PublicKey);

/// Output of [`PrivateKey::diffie_hellman`]
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; X25519_PUBLIC_KEY_SIZE]);

impl PrivateKey {
    /// Fresh clamped key.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(x25519_dalek::StaticSecret::random_from_rng(rng))
    }

    /// Restore a stored key.
    #[must_use]
    pub fn from_bytes(bytes: [u8; X25519_SECRET_KEY_SIZE]) -> Self {
        Self(x25519_dalek::StaticSecret::from(bytes))
    }

    /// Raw scalar for persistence.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; X25519_SECRET_KEY_SIZE] {
        self.0.to_bytes()
    }

    /// Matching public key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(x25519_dalek::PublicKey::from(&self.0))
    }

    /// DH with a peer key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidPublicKey`] when the peer key is a
    /// low-order point and the result is all zeros.
    pub fn diffie_hellman(&self, peer: &PublicKey) -> Result<SharedSecret, CryptoError> {
        let shared = self.0.diffie_hellman(&peer.0);
        if !shared.was_contributory() {
            return Err(CryptoError::InvalidPublicKey);
        }
        Ok(SharedSecret(*shared.as_bytes()))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("x25519::PrivateKey(..)")
    }
}

impl PublicKey {
    /// Raw 32-byte key.
    #[must_use]
    pub fn from_bytes(bytes: [u8; X25519_PUBLIC_KEY_SIZE]) -> Self {
        Self(x25519_dalek::PublicKey::from(bytes))
    }

    /// Raw key from a slice.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] unless the slice is 32 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; X25519_PUBLIC_KEY_SIZE] = slice.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: X25519_PUBLIC_KEY_SIZE,
            actual: slice.len(),
        })?;
        Ok(Self::from_bytes(bytes))
    }

    /// Key from its 44-byte SPKI encoding.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidSpki`] for a wrong header or length.
    pub fn from_spki(encoded: &[u8]) -> Result<Self, CryptoError> {
        Self::from_slice(decode_spki(KeyAlgorithm::X25519, encoded)?)
    }

    /// Raw 32-byte key.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; X25519_PUBLIC_KEY_SIZE] {
        self.0.to_bytes()
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; X25519_PUBLIC_KEY_SIZE] {
        self.0.as_bytes()
    }

    /// 44-byte SPKI encoding used in IDS, queue URIs and client envelopes.
    #[must_use]
    pub fn to_spki(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(X25519_SPKI_SIZE);
        out.extend_from_slice(&X25519_SPKI_HEADER);
        out.extend_from_slice(self.as_bytes());
        out
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.as_bytes();
        write!(
            f,
            "x25519::PublicKey({:02x}{:02x}{:02x}{:02x}..)",
            bytes[0], bytes[1], bytes[2], bytes[3]
        )
    }
}

impl SharedSecret {
    /// Raw shared secret.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; X25519_PUBLIC_KEY_SIZE] {
        &self.0
    }
}
