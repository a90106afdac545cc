//! Client configuration

use crate::error::{Error, Result};
use crate::invitation::ServerAddress;
use std::time::Duration;

/// Default reply-queue server
pub const DEFAULT_SERVER: &str = "smp://u2dS9sG8nMNURyZwqASV4yROM28Er0luVTx5X1CsMrU=@smp4.simplex.im";

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server hosting our reply queue and contact queues
    pub server: ServerAddress,

    /// Timeouts
    pub timeouts: TimeoutConfig,

    /// Mark connections established right after our HELLO instead of
    /// waiting for the peer's HELLO
    pub optimistic_handshake: bool,

    /// Join invitations that arrive inside messages; on unless disabled
    pub auto_accept_invitations: bool,

    /// Secure the peer's queue with `SKEY` while joining
    pub secure_peer_queue: bool,

    /// Display name sent in the connection info profile
    pub display_name: String,

    /// Namespace for persisted contacts
    pub namespace: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: ServerAddress {
                key_hash: [0; 32],
                host: "localhost".to_string(),
                port: crate::invitation::DEFAULT_PORT,
            },
            timeouts: TimeoutConfig::default(),
            optimistic_handshake: true,
            auto_accept_invitations: true,
            secure_peer_queue: true,
            display_name: "smp-user".to_string(),
            namespace: "smp".to_string(),
        }
    }
}

impl ClientConfig {
    /// Configuration for a server given as `smp://<keyHash>@host[:port]`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] for an invalid server address.
    pub fn for_server(server: &str) -> Result<Self> {
        Ok(Self {
            server: server.parse()?,
            ..Self::default()
        })
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            return Err(Error::InvalidConfig("server host is empty".to_string()));
        }
        if self.server.port == 0 {
            return Err(Error::InvalidConfig("server port is 0".to_string()));
        }
        if self.display_name.is_empty() || self.display_name.len() > 100 {
            return Err(Error::InvalidConfig(
                "display name must be 1-100 bytes".to_string(),
            ));
        }
        if self.namespace.is_empty() {
            return Err(Error::InvalidConfig("namespace is empty".to_string()));
        }
        self.timeouts.validate()
    }
}

/// Timeouts
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// TCP connect
    pub connect: Duration,

    /// TLS handshake plus SMP hello exchange
    pub handshake: Duration,

    /// Waiting for the response to one command
    pub command: Duration,

    /// One idle wait of the receive loop
    pub receive_poll: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(15),
            handshake: Duration::from_secs(30),
            command: Duration::from_secs(10),
            receive_poll: Duration::from_secs(5),
        }
    }
}

impl TimeoutConfig {
    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("connect", self.connect),
            ("handshake", self.handshake),
            ("command", self.command),
            ("receive_poll", self.receive_poll),
        ] {
            if value.is_zero() || value > Duration::from_secs(300) {
                return Err(Error::InvalidConfig(format!(
                    "{name} timeout must be between 0 and 300 seconds"
                )));
            }
        }
        Ok(())
    }
}
