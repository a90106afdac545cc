//! Configuration file for the `smp` binary.

use serde::{Deserialize, Serialize};
use smp_core::config::DEFAULT_SERVER;
use smp_core::{ClientConfig, ServerAddress, TimeoutConfig};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// `smp` configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Profile and handshake behaviour
    #[serde(default)]
    pub client: ClientSection,
    /// Timeouts in seconds
    #[serde(default)]
    pub timeouts: TimeoutSection,
    /// Contact storage
    #[serde(default)]
    pub storage: StorageConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server hosting our queues, `smp://<keyHash>@host[:port]`
    #[serde(default = "default_server")]
    pub address: String,
}

/// Profile and handshake behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSection {
    /// Name shown to peers
    #[serde(default = "default_display_name")]
    pub display_name: String,
    /// Namespace of the stored contact table
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Treat a connection as established after our HELLO
    #[serde(default = "default_true")]
    pub optimistic_handshake: bool,
    /// Join invitations received inside messages
    #[serde(default = "default_true")]
    pub auto_accept_invitations: bool,
    /// Secure the peer queue with SKEY when joining
    #[serde(default = "default_true")]
    pub secure_peer_queue: bool,
}

/// Timeouts in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSection {
    /// TCP connect
    #[serde(default = "default_connect_secs")]
    pub connect: u64,
    /// TLS and SMP hello
    #[serde(default = "default_handshake_secs")]
    pub handshake: u64,
    /// One command round trip
    #[serde(default = "default_command_secs")]
    pub command: u64,
    /// Idle wait of the receive loop
    #[serde(default = "default_receive_poll_secs")]
    pub receive_poll: u64,
}

/// Contact storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for contact tables
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_server() -> String {
    DEFAULT_SERVER.to_string()
}

fn default_display_name() -> String {
    "smp-user".to_string()
}

fn default_namespace() -> String {
    "smp".to_string()
}

fn default_true() -> bool {
    true
}

fn default_connect_secs() -> u64 {
    15
}

fn default_handshake_secs() -> u64 {
    30
}

fn default_command_secs() -> u64 {
    10
}

fn default_receive_poll_secs() -> u64 {
    5
}

fn default_storage_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("smp")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_server(),
        }
    }
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            display_name: default_display_name(),
            namespace: default_namespace(),
            optimistic_handshake: true,
            auto_accept_invitations: true,
            secure_peer_queue: true,
        }
    }
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            connect: default_connect_secs(),
            handshake: default_handshake_secs(),
            command: default_command_secs(),
            receive_poll: default_receive_poll_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("smp/config.toml")
    }

    /// Load config from `path`, writing the defaults there first if it
    /// doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();
            config.save(path)?;
            tracing::info!("Wrote default configuration to {}", path.display());
            Ok(config)
        }
    }

    /// Parse the server address
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn server_address(&self) -> anyhow::Result<ServerAddress> {
        self.server
            .address
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid server address '{}': {}", self.server.address, e))
    }

    /// Client configuration for `smp-core`
    ///
    /// # Errors
    ///
    /// Returns an error if the server address is invalid.
    pub fn client_config(&self) -> anyhow::Result<ClientConfig> {
        Ok(ClientConfig {
            server: self.server_address()?,
            timeouts: TimeoutConfig {
                connect: Duration::from_secs(self.timeouts.connect),
                handshake: Duration::from_secs(self.timeouts.handshake),
                command: Duration::from_secs(self.timeouts.command),
                receive_poll: Duration::from_secs(self.timeouts.receive_poll),
            },
            optimistic_handshake: self.client.optimistic_handshake,
            auto_accept_invitations: self.client.auto_accept_invitations,
            secure_peer_queue: self.client.secure_peer_queue,
            display_name: self.client.display_name.clone(),
            namespace: self.client.namespace.clone(),
        })
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        // Server address, names and timeout ranges
        self.client_config()?.validate()?;

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        if self.storage.dir.as_os_str().is_empty() {
            anyhow::bail!("Storage directory is empty");
        }

        Ok(())
    }
}
