//! Error types for the SMP client core.

use smp_crypto::{CryptoError, RatchetError};
use smp_transport::TransportError;
use thiserror::Error;

/// Core client errors
#[derive(Debug, Error)]
pub enum Error {
    /// Transport failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Queue command failure
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Ratchet failure
    #[error("ratchet error: {0}")]
    Ratchet(#[from] RatchetError),

    /// Agent handshake failure
    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// Wire parsing failure
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Contact persistence failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Cryptographic primitive failure
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Invalid client configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Queue manager errors
#[derive(Debug, Error)]
pub enum QueueError {
    /// Server answered with `ERR`
    #[error("server rejected command: {0}")]
    ServerRejected(String),

    /// Local verification of a freshly made signature failed
    #[error("signature self-check failed")]
    SignatureInvalid,

    /// `IDS` response with invalid identifiers or server key
    #[error("malformed IDS response: {0}")]
    MalformedIds(String),

    /// Contact table is full
    #[error("contact capacity exceeded ({0} slots)")]
    CapacityExceeded(usize),

    /// No response with our correlation id before the deadline
    #[error("timed out waiting for {0} response")]
    Timeout(&'static str),

    /// Named contact does not exist
    #[error("contact not found: {0}")]
    NotFound(String),

    /// Queue has no server DH key yet
    #[error("queue not established")]
    NotEstablished,
}

/// Agent handshake errors
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// Peer server rejected the confirmation `SEND`
    #[error("confirmation rejected: {0}")]
    ConfirmationRejected(String),

    /// Peer server rejected the HELLO `SEND`
    #[error("HELLO rejected: {0}")]
    HelloRejected(String),

    /// Invitation or connection info carried no peer DH key
    #[error("no peer DH key")]
    NoPeerDhKey,

    /// Invitation carried no X3DH ratchet keys
    #[error("no peer ratchet keys")]
    MissingRatchetKeys,

    /// Connection cannot carry messages yet
    #[error("connection not ready (state {0})")]
    NotReady(&'static str),

    /// No connection with that peer name
    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    /// State machine transition not allowed
    #[error("invalid handshake transition {from} -> {to}")]
    InvalidTransition {
        /// Current state
        from: &'static str,
        /// Requested state
        to: &'static str,
    },
}

/// Wire parsing errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Input ended before a field was complete
    #[error("truncated: needed {needed} bytes, {remaining} remaining")]
    TruncatedResponse {
        /// Bytes required by the field
        needed: usize,
        /// Bytes left in the input
        remaining: usize,
    },

    /// Command mnemonic not expected here
    #[error("unexpected command: {0}")]
    UnexpectedCommand(String),

    /// Field longer than its 1-byte length prefix allows
    #[error("field too long: {0} bytes")]
    FieldTooLong(usize),

    /// Invitation or server URI could not be parsed
    #[error("invalid URI: {0}")]
    InvalidUri(String),

    /// Agent envelope malformed
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),
}

/// Contact persistence errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored blob could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversions() {
        let err: Error = QueueError::SignatureInvalid.into();
        assert!(matches!(err, Error::Queue(QueueError::SignatureInvalid)));

        let err: Error = TransportError::ConnectionClosed.into();
        assert_eq!(err.to_string(), "transport error: connection closed");

        let err: Error = ParseError::FieldTooLong(300).into();
        assert!(err.to_string().contains("300"));
    }

    #[test]
    fn test_transition_display() {
        let err = HandshakeError::InvalidTransition {
            from: "Idle",
            to: "Connected",
        };
        assert_eq!(err.to_string(), "invalid handshake transition Idle -> Connected");
    }
}
