//! AES-256-GCM with detached tags.
//!
//! The ratchet encrypts headers and payloads with AES-256-GCM using 16-byte
//! IVs derived from the chain KDF. Standard 12-byte IVs are accepted too.
//! Ciphertext and tag are returned separately because the wire format
//! places the tag ahead of the ciphertext.

use crate::{AUTH_TAG_SIZE, CryptoError};
use aes_gcm::aead::consts::{U12, U16};
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use zeroize::{Zeroize, ZeroizeOnDrop};

type Aes256Gcm12 = AesGcm<Aes256, U12>;
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// AES-256-GCM key size
pub const KEY_SIZE: usize = 32;

/// AES-256-GCM key (32 bytes), zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AeadKey([u8; KEY_SIZE]);

impl AeadKey {
    /// Create from raw bytes
    #[must_use]
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get raw key bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Encrypt `plaintext`, returning `(ciphertext, tag)`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidNonceLength`] unless `iv` is 12 or 16
    /// bytes, or [`CryptoError::EncryptionFailed`] on cipher failure.
    pub fn seal(
        &self,
        iv: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<(Vec<u8>, [u8; AUTH_TAG_SIZE]), CryptoError> {
        let mut buffer = plaintext.to_vec();
        let tag = match iv.len() {
            12 => Aes256Gcm12::new(GenericArray::from_slice(&self.0))
                .encrypt_in_place_detached(GenericArray::from_slice(iv), aad, &mut buffer),
            16 => Aes256Gcm16::new(GenericArray::from_slice(&self.0))
                .encrypt_in_place_detached(GenericArray::from_slice(iv), aad, &mut buffer),
            other => return Err(CryptoError::InvalidNonceLength(other)),
        }
        .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut tag_bytes = [0u8; AUTH_TAG_SIZE];
        tag_bytes.copy_from_slice(&tag);
        Ok((buffer, tag_bytes))
    }

    /// Decrypt `ciphertext` and verify `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::DecryptionFailed`] on authentication failure and
    /// [`CryptoError::InvalidNonceLength`] for unsupported IV sizes.
    pub fn open(
        &self,
        iv: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &[u8; AUTH_TAG_SIZE],
    ) -> Result<Vec<u8>, CryptoError> {
        let mut buffer = ciphertext.to_vec();
        let tag = GenericArray::from_slice(tag);
        match iv.len() {
            12 => Aes256Gcm12::new(GenericArray::from_slice(&self.0)).decrypt_in_place_detached(
                GenericArray::from_slice(iv),
                aad,
                &mut buffer,
                tag,
            ),
            16 => Aes256Gcm16::new(GenericArray::from_slice(&self.0)).decrypt_in_place_detached(
                GenericArray::from_slice(iv),
                aad,
                &mut buffer,
                tag,
            ),
            other => return Err(CryptoError::InvalidNonceLength(other)),
        }
        .map_err(|_| CryptoError::DecryptionFailed)?;
        Ok(buffer)
    }
}
