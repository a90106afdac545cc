//! Server addresses, queue URIs and invitation links.
//!
//! ```text
//! server:     smp://<b64url keyHash>@host[:port]
//! queue URI:  smp://<b64url keyHash>@host:port/<b64url senderId>#/?v=1-4&dh=<b64url SPKI(X25519)>&q=c
//! invitation: simplex:/contact#/?v=2-7&smp=<urlencoded queue URI>[&e2e=<urlencoded "v=2-3&x3dh=k1,k2">]
//!             https://simplex.chat/contact#/?v=2-7&smp=...
//! ```
//!
//! Parsing is lenient: base64 padding and either alphabet are accepted and
//! percent-encoding is peeled off up to three times.

use crate::error::ParseError;
use crate::queue::QueueInfo;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use smp_crypto::spki::{KeyAlgorithm, decode_spki, encode_spki};
use smp_crypto::{x25519, x448};
use std::fmt;
use std::str::FromStr;

/// Default SMP server port
pub const DEFAULT_PORT: u16 = 5223;

/// Maximum percent-decoding passes applied to an embedded queue URI
pub const MAX_DECODE_PASSES: usize = 3;

/// Characters left unescaped in link parameters
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Encode bytes as unpadded base64url.
#[must_use]
pub fn b64url(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode base64url, tolerating `=` padding and the standard alphabet.
///
/// # Errors
///
/// Returns [`ParseError::InvalidUri`] for invalid input.
pub fn decode_b64url(text: &str) -> Result<Vec<u8>, ParseError> {
    let normalized: String = text
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();
    URL_SAFE_NO_PAD
        .decode(normalized.as_bytes())
        .map_err(|e| ParseError::InvalidUri(format!("bad base64 {text:?}: {e}")))
}

fn invalid(msg: impl Into<String>) -> ParseError {
    ParseError::InvalidUri(msg.into())
}

fn parse_key_hash(text: &str) -> Result<[u8; 32], ParseError> {
    decode_b64url(text)?
        .try_into()
        .map_err(|_| invalid("key hash must be 32 bytes"))
}

fn parse_host_port(text: &str) -> Result<(String, u16), ParseError> {
    let first = text.split(',').next().unwrap_or_default();
    let (host, port) = match first.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse().map_err(|_| invalid(format!("bad port {port:?}")))?;
            (host, port)
        }
        None => (first, DEFAULT_PORT),
    };
    if host.is_empty() {
        return Err(invalid("empty host"));
    }
    Ok((host.to_string(), port))
}

/// SMP server address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    /// SHA-256 hash of the server certificate
    pub key_hash: [u8; 32],
    /// Host name
    pub host: String,
    /// Port
    pub port: u16,
}

impl FromStr for ServerAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .trim()
            .strip_prefix("smp://")
            .ok_or_else(|| invalid("server address must start with smp://"))?;
        let (hash, host_port) = rest
            .split_once('@')
            .ok_or_else(|| invalid("server address needs <keyHash>@<host>"))?;
        let host_port = host_port.trim_end_matches('/');
        let (host, port) = parse_host_port(host_port)?;
        Ok(Self {
            key_hash: parse_key_hash(hash)?,
            host,
            port,
        })
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "smp://{}@{}", b64url(&self.key_hash), self.host)?;
        if self.port != DEFAULT_PORT {
            write!(f, ":{}", self.port)?;
        }
        Ok(())
    }
}

/// Peer discovered from an invitation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPeer {
    /// Peer queue server host
    pub host: String,
    /// Peer queue server port
    pub port: u16,
    /// Peer queue server key hash
    pub key_hash: [u8; 32],
    /// Sender id of the peer's queue
    pub queue_id: Vec<u8>,
    /// Peer's X25519 key for client envelopes
    pub dh_public: Option<x25519::PublicKey>,
    /// Peer's X3DH keys
    pub ratchet_keys: Option<(x448::PublicKey, x448::PublicKey)>,
}

impl PendingPeer {
    /// Everything a join needs is known: host, queue id, the envelope DH
    /// key and both X3DH keys
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.host.is_empty()
            && !self.queue_id.is_empty()
            && self.dh_public.is_some()
            && self.ratchet_keys.is_some()
    }

    /// Server address of the peer's queue
    #[must_use]
    pub fn server(&self) -> ServerAddress {
        ServerAddress {
            key_hash: self.key_hash,
            host: self.host.clone(),
            port: self.port,
        }
    }
}

/// Link flavour for [`invitation_link`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkStyle {
    /// `simplex:/contact#/?...`
    #[default]
    Simplex,
    /// `https://simplex.chat/contact#/?...`
    Https,
}

/// Build the `smp://` URI of a queue.
///
/// # Errors
///
/// Returns [`ParseError::InvalidUri`] if the DH key cannot be SPKI-encoded.
pub fn queue_uri(info: &QueueInfo) -> Result<String, ParseError> {
    let dh = info.dh_public.to_spki();
    Ok(format!(
        "smp://{}@{}:{}/{}#/?v=1-4&dh={}&q=c",
        b64url(&info.key_hash),
        info.host,
        info.port,
        b64url(&info.sender_id),
        b64url(&dh)
    ))
}

/// Wrap a queue URI (and optional X3DH keys) into a shareable link.
///
/// # Errors
///
/// Returns [`ParseError::InvalidUri`] if a key cannot be SPKI-encoded.
pub fn invitation_link(
    queue_uri: &str,
    ratchet_keys: Option<(&x448::PublicKey, &x448::PublicKey)>,
    style: LinkStyle,
) -> Result<String, ParseError> {
    let prefix = match style {
        LinkStyle::Simplex => "simplex:/contact#/?v=2-7&smp=",
        LinkStyle::Https => "https://simplex.chat/contact#/?v=2-7&smp=",
    };
    let mut link = format!("{prefix}{}", utf8_percent_encode(queue_uri, COMPONENT));
    if let Some((key1, key2)) = ratchet_keys {
        let spki = |key: &x448::PublicKey| {
            encode_spki(KeyAlgorithm::X448, key.as_bytes())
                .map(|bytes| b64url(&bytes))
                .map_err(|e| invalid(e.to_string()))
        };
        let e2e = format!("v=2-3&x3dh={},{}", spki(key1)?, spki(key2)?);
        link.push_str("&e2e=");
        link.push_str(&utf8_percent_encode(&e2e, COMPONENT).to_string());
    }
    Ok(link)
}

fn percent_decode(text: &str) -> String {
    percent_decode_str(text).decode_utf8_lossy().into_owned()
}

fn query_params(query: &str) -> impl Iterator<Item = (&str, &str)> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
}

/// Parse a bare `smp://` queue URI.
///
/// # Errors
///
/// Returns [`ParseError::InvalidUri`] if the server, queue id or DH key is malformed.
pub fn parse_queue_uri(uri: &str) -> Result<PendingPeer, ParseError> {
    let rest = uri
        .trim()
        .strip_prefix("smp://")
        .ok_or_else(|| invalid("queue URI must start with smp://"))?;
    let (address, fragment) = rest.split_once('#').unwrap_or((rest, ""));
    let (server, queue_id) = address
        .rsplit_once('/')
        .ok_or_else(|| invalid("queue URI has no queue id"))?;
    let (hash, host_port) = server
        .split_once('@')
        .ok_or_else(|| invalid("queue URI needs <keyHash>@<host>"))?;
    let (host, port) = parse_host_port(host_port)?;

    let queue_id = decode_b64url(queue_id)?;
    if queue_id.is_empty() {
        return Err(invalid("empty queue id"));
    }

    let query = fragment.trim_start_matches('/').trim_start_matches('?');
    let dh_public = match query_params(query).find(|(key, _)| *key == "dh") {
        Some((_, value)) => {
            let spki = decode_b64url(value)?;
            Some(x25519::PublicKey::from_spki(&spki).map_err(|e| invalid(e.to_string()))?)
        }
        None => None,
    };

    Ok(PendingPeer {
        host,
        port,
        key_hash: parse_key_hash(hash)?,
        queue_id,
        dh_public,
        ratchet_keys: None,
    })
}

fn parse_e2e(value: &str) -> Result<(x448::PublicKey, x448::PublicKey), ParseError> {
    let mut decoded = value.to_string();
    for _ in 0..MAX_DECODE_PASSES {
        if decoded.contains("x3dh=") {
            break;
        }
        decoded = percent_decode(&decoded);
    }
    let keys = query_params(&decoded)
        .find(|(key, _)| *key == "x3dh")
        .map(|(_, keys)| keys)
        .ok_or_else(|| invalid("e2e parameter without x3dh keys"))?;
    let (key1, key2) = keys
        .split_once(',')
        .ok_or_else(|| invalid("x3dh needs two keys"))?;
    let parse_key = |text: &str| -> Result<x448::PublicKey, ParseError> {
        let spki = decode_b64url(text)?;
        let raw = decode_spki(KeyAlgorithm::X448, &spki).map_err(|e| invalid(e.to_string()))?;
        x448::PublicKey::from_slice(raw).map_err(|e| invalid(e.to_string()))
    };
    Ok((parse_key(key1)?, parse_key(key2)?))
}

fn parse_link_params(params: &str) -> Result<PendingPeer, ParseError> {
    let params = params.split_whitespace().next().unwrap_or_default();
    let mut smp = None;
    let mut e2e = None;
    for (key, value) in query_params(params) {
        match key {
            "smp" => smp = Some(value),
            "e2e" => e2e = Some(value),
            _ => {}
        }
    }
    let mut uri = smp.ok_or_else(|| invalid("no smp parameter"))?.to_string();
    for _ in 0..MAX_DECODE_PASSES {
        if uri.starts_with("smp://") {
            break;
        }
        uri = percent_decode(&uri);
    }

    let mut peer = parse_queue_uri(&uri)?;
    if let Some(e2e) = e2e {
        peer.ratchet_keys = Some(parse_e2e(e2e)?);
    }
    Ok(peer)
}

/// Parse an invitation: a `simplex:` or `https://simplex.chat` link, a
/// bare queue URI, or text containing either.
///
/// # Errors
///
/// Returns [`ParseError::InvalidUri`] if no queue URI can be recovered.
pub fn parse_invitation(text: &str) -> Result<PendingPeer, ParseError> {
    let mut current = text.trim().to_string();
    for _ in 0..=MAX_DECODE_PASSES {
        if let Some(start) = current.find("smp=") {
            return parse_link_params(&current[start..]);
        }
        if let Some(start) = current.find("smp://") {
            let uri = current[start..].split_whitespace().next().unwrap_or_default();
            return parse_queue_uri(uri);
        }
        if !current.contains("smp%") {
            break;
        }
        current = percent_decode(&current);
    }
    Err(invalid("no SMP queue URI found"))
}
