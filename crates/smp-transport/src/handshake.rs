//! SMP server/client hello exchange.
//!
//! After TLS completes the server sends one block:
//!
//! ```text
//! [minVersion u16][maxVersion u16][sessLen u8][sessionId][certCount u8]{[certLen u16][DER]}*
//! ```
//!
//! The certificate chain only serves to derive the 32-byte server key hash:
//! SHA-256 over the second certificate when present, else the first. The
//! client answers with `[version u16][32][keyHash]`.

use crate::transport::{TransportError, TransportResult};
use smp_crypto::hash::sha256;

/// SMP protocol version spoken by this client
pub const SMP_CLIENT_VERSION: u16 = 6;

/// Parsed server hello
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    /// Lowest protocol version the server accepts
    pub min_version: u16,
    /// Highest protocol version the server accepts
    pub max_version: u16,
    /// TLS-bound session identifier
    pub session_id: Vec<u8>,
    /// DER certificates, leaf first
    pub cert_chain: Vec<Vec<u8>>,
}

fn truncated(what: &str) -> TransportError {
    TransportError::InvalidHandshake(format!("server hello truncated at {what}"))
}

impl ServerHello {
    /// Parse server hello block content.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidHandshake`] if a field overruns the content.
    pub fn parse(content: &[u8]) -> TransportResult<Self> {
        if content.len() < 5 {
            return Err(truncated("version range"));
        }
        let min_version = u16::from_be_bytes([content[0], content[1]]);
        let max_version = u16::from_be_bytes([content[2], content[3]]);
        let sess_len = content[4] as usize;
        let mut pos = 5;
        let session_id = content
            .get(pos..pos + sess_len)
            .ok_or_else(|| truncated("session id"))?
            .to_vec();
        pos += sess_len;

        let mut cert_chain = Vec::new();
        if let Some(&count) = content.get(pos) {
            pos += 1;
            for _ in 0..count {
                let len_bytes = content
                    .get(pos..pos + 2)
                    .ok_or_else(|| truncated("certificate length"))?;
                let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
                pos += 2;
                let der = content
                    .get(pos..pos + len)
                    .ok_or_else(|| truncated("certificate"))?;
                cert_chain.push(der.to_vec());
                pos += len;
            }
        }

        Ok(Self {
            min_version,
            max_version,
            session_id,
            cert_chain,
        })
    }

    /// Encode as block content (used by test servers).
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.min_version.to_be_bytes());
        out.extend_from_slice(&self.max_version.to_be_bytes());
        out.push(self.session_id.len() as u8);
        out.extend_from_slice(&self.session_id);
        if !self.cert_chain.is_empty() {
            out.push(self.cert_chain.len() as u8);
            for cert in &self.cert_chain {
                out.extend_from_slice(&(cert.len() as u16).to_be_bytes());
                out.extend_from_slice(cert);
            }
        }
        out
    }

    /// Check that the server accepts [`SMP_CLIENT_VERSION`].
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::UnsupportedVersion`] otherwise.
    pub fn check_version(&self) -> TransportResult<()> {
        if self.min_version <= SMP_CLIENT_VERSION && SMP_CLIENT_VERSION <= self.max_version {
            Ok(())
        } else {
            Err(TransportError::UnsupportedVersion {
                min: self.min_version,
                max: self.max_version,
            })
        }
    }

    /// Key hash from the certificate chain, if the server sent one.
    #[must_use]
    pub fn key_hash(&self) -> Option<[u8; 32]> {
        key_hash_from_chain(&self.cert_chain)
    }
}

/// SHA-256 of the second certificate when present, else the first.
#[must_use]
pub fn key_hash_from_chain<C: AsRef<[u8]>>(chain: &[C]) -> Option<[u8; 32]> {
    chain
        .get(1)
        .or_else(|| chain.first())
        .map(|cert| sha256(cert.as_ref()))
}

/// Client hello sent in reply to the server hello
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    /// Selected protocol version
    pub version: u16,
    /// Server key hash the client expects
    pub key_hash: [u8; 32],
}

impl ClientHello {
    /// Encode as block content.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(35);
        out.extend_from_slice(&self.version.to_be_bytes());
        out.push(32);
        out.extend_from_slice(&self.key_hash);
        out
    }

    /// Parse client hello content (used by test servers).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidHandshake`] if malformed.
    pub fn parse(content: &[u8]) -> TransportResult<Self> {
        if content.len() < 35 || content[2] != 32 {
            return Err(TransportError::InvalidHandshake(
                "client hello malformed".to_string(),
            ));
        }
        let mut key_hash = [0u8; 32];
        key_hash.copy_from_slice(&content[3..35]);
        Ok(Self {
            version: u16::from_be_bytes([content[0], content[1]]),
            key_hash,
        })
    }
}
