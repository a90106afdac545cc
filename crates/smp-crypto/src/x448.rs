//! X448 Diffie-Hellman key exchange (RFC 7748).
//!
//! X448 keys carry the ratchet: both X3DH identity keys and every ratchet
//! DH key are X448. Keys use the RFC 7748 little-endian wire encoding as is;
//! the test vectors below pin that convention.

use crate::{CryptoError, X448_PUBLIC_KEY_SIZE, X448_SECRET_KEY_SIZE, random};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// X448 private key (56 bytes, clamped on use).
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey([u8; X448_SECRET_KEY_SIZE]);

/// X448 public key (56 bytes).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey([u8; X448_PUBLIC_KEY_SIZE]);

/// X448 shared secret (56 bytes).
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; 56]);

impl PrivateKey {
    /// Generate a new random private key from the OS CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::RandomFailed`] if the OS CSPRNG fails.
    pub fn generate() -> Result<Self, CryptoError> {
        Ok(Self(random::random_array()?))
    }

    /// Import from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; X448_SECRET_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Export raw bytes.
    ///
    /// # Security
    ///
    /// The returned bytes contain the raw private key. Handle with care.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; X448_SECRET_KEY_SIZE] {
        self.0
    }

    fn secret(&self) -> Option<::x448::Secret> {
        ::x448::Secret::from_bytes(&self.0)
    }

    /// Derive the public key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] if the scalar cannot be decoded.
    pub fn public_key(&self) -> Result<PublicKey, CryptoError> {
        let secret = self.secret().ok_or(CryptoError::InvalidKeyLength {
            expected: X448_SECRET_KEY_SIZE,
            actual: self.0.len(),
        })?;
        let public = ::x448::PublicKey::from(&secret);
        Ok(PublicKey(*public.as_bytes()))
    }

    /// Perform Diffie-Hellman key exchange.
    ///
    /// Returns `None` if the peer key is a low-order point.
    #[must_use]
    pub fn exchange(&self, peer_public: &PublicKey) -> Option<SharedSecret> {
        let secret = self.secret()?;
        let public = ::x448::PublicKey::from_bytes(&peer_public.0)?;
        let shared = secret.as_diffie_hellman(&public)?;
        Some(SharedSecret(*shared.as_bytes()))
    }
}

impl PublicKey {
    /// Import public key from bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; X448_PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Import public key from a slice.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] if the slice is not 56 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; X448_PUBLIC_KEY_SIZE] =
            slice.try_into().map_err(|_| CryptoError::InvalidKeyLength {
                expected: X448_PUBLIC_KEY_SIZE,
                actual: slice.len(),
            })?;
        Ok(Self(bytes))
    }

    /// Get bytes as a slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; X448_PUBLIC_KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "X448PublicKey({:02x}{:02x}{:02x}{:02x}..)", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

impl SharedSecret {
    /// Get shared secret as bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 56] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arr56(s: &str) -> [u8; 56] {
        hex::decode(s).unwrap().try_into().unwrap()
    }

    const ALICE_PRIVATE: &str = "9a8f4925d1519f5775cf46b04b5800d4ee9ee8bae8bc5565d498c28dd9c9baf574a9419744897391006382a6f127ab1d9ac2d8c0a598726b";
    const ALICE_PUBLIC: &str = "9b08f7cc31b7e3e67d22d5aea121074a273bd2b83de09c63faa73d2c22c5d9bbc836647241d953d40c5b12da88120d53177f80e532c41fa0";
    const BOB_PRIVATE: &str = "1c306a7ac2a0e2e0990b294470cba339e6453772b075811d8fad0d1d6927c120bb5ee8972b0d3e21374c9c921b09d1b0366f10b65173992d";
    const BOB_PUBLIC: &str = "3eb7a829b0cd20f5bcfc0b599b6feccf6da4627107bdb0d4f345b43027d8b972fc3e34fb4232a13ca706dcb57aec3dae07bdc1c67bf33609";
    const SHARED: &str = "07fff4181ac6cc95ec1c16a94a0f74d12da232ce40a77552281d282bb60c0b56fd2464c335543936521c24403085d59a449a5037514a879d";

    // RFC 7748 section 6.2
    #[test]
    fn test_rfc7748_public_keys() {
        let alice = PrivateKey::from_bytes(arr56(ALICE_PRIVATE));
        let bob = PrivateKey::from_bytes(arr56(BOB_PRIVATE));
        assert_eq!(alice.public_key().unwrap().as_bytes(), &arr56(ALICE_PUBLIC));
        assert_eq!(bob.public_key().unwrap().as_bytes(), &arr56(BOB_PUBLIC));
    }

    #[test]
    fn test_rfc7748_shared_secret() {
        let alice = PrivateKey::from_bytes(arr56(ALICE_PRIVATE));
        let bob_public = PublicKey::from_bytes(arr56(BOB_PUBLIC));
        let shared = alice.exchange(&bob_public).unwrap();
        assert_eq!(shared.as_bytes(), &arr56(SHARED));
    }

    #[test]
    fn test_random_exchange_agrees() {
        let a = PrivateKey::generate().unwrap();
        let b = PrivateKey::generate().unwrap();
        let ab = a.exchange(&b.public_key().unwrap()).unwrap();
        let ba = b.exchange(&a.public_key().unwrap()).unwrap();
        assert_eq!(ab.as_bytes(), ba.as_bytes());
    }

    #[test]
    fn test_reject_zero_public_key() {
        let a = PrivateKey::generate().unwrap();
        assert!(a.exchange(&PublicKey::from_bytes([0u8; 56])).is_none());
    }
}
