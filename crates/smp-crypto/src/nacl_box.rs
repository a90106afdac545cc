//! NaCl `crypto_box` (X25519 + XSalsa20-Poly1305).
//!
//! Used twice per message: the server encrypts delivered messages to the
//! queue's DH key, and senders box their client envelope to the peer's
//! connection DH key. Output is `tag(16) ++ ciphertext`, as libsodium.

use crate::x25519::{PrivateKey, PublicKey};
use crate::{BOX_NONCE_SIZE, CryptoError};
use crypto_box::SalsaBox;
use crypto_box::aead::Aead;
use crypto_box::aead::generic_array::GenericArray;

fn salsa_box(peer_public: &PublicKey, our_private: &PrivateKey) -> SalsaBox {
    let public = crypto_box::PublicKey::from(peer_public.to_bytes());
    let secret = crypto_box::SecretKey::from(our_private.to_bytes());
    SalsaBox::new(&public, &secret)
}

/// Encrypt `plaintext` for `peer_public` with our private key.
///
/// # Errors
///
/// Returns [`CryptoError::EncryptionFailed`] if the cipher rejects the input.
pub fn seal(
    plaintext: &[u8],
    nonce: &[u8; BOX_NONCE_SIZE],
    peer_public: &PublicKey,
    our_private: &PrivateKey,
) -> Result<Vec<u8>, CryptoError> {
    salsa_box(peer_public, our_private)
        .encrypt(GenericArray::from_slice(nonce), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)
}

/// Decrypt a box produced by [`seal`].
///
/// # Errors
///
/// Returns [`CryptoError::DecryptionFailed`] if authentication fails.
pub fn open(
    ciphertext: &[u8],
    nonce: &[u8; BOX_NONCE_SIZE],
    peer_public: &PublicKey,
    our_private: &PrivateKey,
) -> Result<Vec<u8>, CryptoError> {
    salsa_box(peer_public, our_private)
        .decrypt(GenericArray::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Expand a short message ID into a 24-byte box nonce (zero padded).
///
/// # Errors
///
/// Returns [`CryptoError::InvalidNonceLength`] if `id` is longer than 24 bytes.
pub fn nonce_from_id(id: &[u8]) -> Result<[u8; BOX_NONCE_SIZE], CryptoError> {
    if id.len() > BOX_NONCE_SIZE {
        return Err(CryptoError::InvalidNonceLength(id.len()));
    }
    let mut nonce = [0u8; BOX_NONCE_SIZE];
    nonce[..id.len()].copy_from_slice(id);
    Ok(nonce)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AUTH_TAG_SIZE;
    use rand_core::OsRng;

    #[test]
    fn test_box_roundtrip() {
        let alice = PrivateKey::generate(&mut OsRng);
        let bob = PrivateKey::generate(&mut OsRng);
        let nonce = [7u8; 24];

        let ct = seal(b"client message", &nonce, &bob.public_key(), &alice).unwrap();
        assert_eq!(ct.len(), b"client message".len() + AUTH_TAG_SIZE);

        let pt = open(&ct, &nonce, &alice.public_key(), &bob).unwrap();
        assert_eq!(pt, b"client message");
    }

    #[test]
    fn test_box_wrong_nonce_fails() {
        let alice = PrivateKey::generate(&mut OsRng);
        let bob = PrivateKey::generate(&mut OsRng);
        let ct = seal(b"x", &[1u8; 24], &bob.public_key(), &alice).unwrap();
        assert_eq!(
            open(&ct, &[2u8; 24], &alice.public_key(), &bob),
            Err(CryptoError::DecryptionFailed)
        );
    }

    #[test]
    fn test_box_wrong_key_fails() {
        let alice = PrivateKey::generate(&mut OsRng);
        let bob = PrivateKey::generate(&mut OsRng);
        let eve = PrivateKey::generate(&mut OsRng);
        let ct = seal(b"x", &[1u8; 24], &bob.public_key(), &alice).unwrap();
        assert!(open(&ct, &[1u8; 24], &alice.public_key(), &eve).is_err());
    }

    #[test]
    fn test_nonce_from_id() {
        let nonce = nonce_from_id(&[0xAB; 12]).unwrap();
        assert_eq!(&nonce[..12], &[0xAB; 12]);
        assert_eq!(&nonce[12..], &[0u8; 12]);
        assert!(nonce_from_id(&[0u8; 25]).is_err());
    }
}
