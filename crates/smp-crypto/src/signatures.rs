//! Ed25519 keys for SMP command authorization.
//!
//! Recipient commands (NEW, SUB, ACK, DEL) are signed with the queue's
//! recipient key, SENDs to a secured queue with the sender key registered by
//! SKEY. The signed bytes are `[0x20][sessionId] ++ corrId ++ entity ++
//! command`; see `smp-core::transmission`.
//!
//! Recipient keys are persisted in the 64-byte keypair form (seed followed by
//! public key) that the contact table stores.

use crate::spki::{ED25519_SPKI_HEADER, KeyAlgorithm, SPKI_HEADER_LEN, decode_spki};
use crate::{CryptoError, ED25519_KEYPAIR_SIZE, ED25519_PUBLIC_KEY_SIZE, ED25519_SIGNATURE_SIZE};
use ed25519_dalek::{Signer, Verifier};
use rand_core::{CryptoRng, RngCore};
use std::fmt;
use zeroize::ZeroizeOnDrop;

/// Detached Ed25519 signature
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature([u8; ED25519_SIGNATURE_SIZE]);

impl Signature {
    /// Wrap raw signature bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; ED25519_SIGNATURE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Signature field of a transmission.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidSignature`] unless the field is 64 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        slice.try_into().map(Self).map_err(|_| CryptoError::InvalidSignature)
    }

    /// Raw bytes for the transmission signature field.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; ED25519_SIGNATURE_SIZE] {
        &self.0
    }
}

/// Queue recipient or sender key
#[derive(Clone, ZeroizeOnDrop)]
pub struct SigningKey {
    inner: ed25519_dalek::SigningKey,
}

impl SigningKey {
    /// Fresh key for a new queue or for SKEY.
    #[must_use]
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::generate(rng),
        }
    }

    /// Restore from the stored keypair form.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidSignature`] if the public half does not
    /// belong to the seed.
    pub fn from_keypair_bytes(bytes: &[u8; ED25519_KEYPAIR_SIZE]) -> Result<Self, CryptoError> {
        ed25519_dalek::SigningKey::from_keypair_bytes(bytes)
            .map(|inner| Self { inner })
            .map_err(|_| CryptoError::InvalidSignature)
    }

    /// Stored keypair form. Holds the secret seed.
    #[must_use]
    pub fn to_keypair_bytes(&self) -> [u8; ED25519_KEYPAIR_SIZE] {
        self.inner.to_keypair_bytes()
    }

    /// Sign the authorized bytes of a transmission.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.inner.sign(message).to_bytes())
    }

    /// Sign and verify the result against our own public key before it
    /// leaves the process.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidSignature`] if the self-check fails.
    pub fn sign_checked(&self, message: &[u8]) -> Result<Signature, CryptoError> {
        let signature = self.sign(message);
        self.verifying_key().verify(message, &signature)?;
        Ok(signature)
    }

    /// Public half.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey {
            inner: self.inner.verifying_key(),
        }
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("public", &self.verifying_key())
            .finish_non_exhaustive()
    }
}

/// Public half, sent SPKI-encoded in NEW and SKEY
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VerifyingKey {
    inner: ed25519_dalek::VerifyingKey,
}

impl VerifyingKey {
    /// Key from its raw 32 bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidPublicKey`] if the bytes are not a valid
    /// Edwards point.
    pub fn from_bytes(bytes: &[u8; ED25519_PUBLIC_KEY_SIZE]) -> Result<Self, CryptoError> {
        ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map(|inner| Self { inner })
            .map_err(|_| CryptoError::InvalidPublicKey)
    }

    /// Key from its 44-byte SPKI encoding.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidSpki`] for a wrong header or length and
    /// [`CryptoError::InvalidPublicKey`] for an invalid point.
    pub fn from_spki(encoded: &[u8]) -> Result<Self, CryptoError> {
        let raw = decode_spki(KeyAlgorithm::Ed25519, encoded)?;
        let bytes: &[u8; ED25519_PUBLIC_KEY_SIZE] = raw.try_into().map_err(|_| CryptoError::InvalidPublicKey)?;
        Self::from_bytes(bytes)
    }

    /// Raw 32-byte key.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; ED25519_PUBLIC_KEY_SIZE] {
        self.inner.to_bytes()
    }

    /// 44-byte SPKI encoding sent in NEW and SKEY.
    #[must_use]
    pub fn to_spki(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SPKI_HEADER_LEN + ED25519_PUBLIC_KEY_SIZE);
        out.extend_from_slice(&ED25519_SPKI_HEADER);
        out.extend_from_slice(self.inner.as_bytes());
        out
    }

    /// Check a signature over `message`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidSignature`] if verification fails.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), CryptoError> {
        let signature = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
        self.inner
            .verify(message, &signature)
            .map_err(|_| CryptoError::InvalidSignature)
    }
}
