//! Configuration types for peer-bridge
//!
//! This module defines all configuration structures used by the bridge.
//! Configuration is loaded from JSON files and validated at startup.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::io::{MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Local loopback leg settings
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Connection registry limits
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Start/stop operation sequencing
    #[serde(default)]
    pub sequencer: SequencerConfig,

    /// TCP stand-in transport used by the daemon
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bridge.validate()?;
        self.registry.validate()?;
        self.sequencer.validate()?;
        self.log.validate()?;
        Ok(())
    }

    /// Create a default configuration
    #[must_use]
    pub fn default_config() -> Self {
        Self::default()
    }
}

/// Settings for the local loopback leg of every session
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeConfig {
    /// Port incoming sessions dial on the loopback address (0 = unset)
    #[serde(default)]
    pub server_port: u16,

    /// Loopback address used for both listening and dialing
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// Chunk size for each copy direction
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// How long an outgoing session waits for the application to connect
    #[serde(default)]
    pub accept_timeout_ms: Option<u64>,
}

impl BridgeConfig {
    /// Validate bridge configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.bind_address.is_loopback() {
            return Err(ConfigError::ValidationError(format!(
                "bind_address must be a loopback address, got {}",
                self.bind_address
            )));
        }

        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            return Err(ConfigError::ValidationError(format!(
                "chunk_size must be between {MIN_CHUNK_SIZE} and {MAX_CHUNK_SIZE}, got {}",
                self.chunk_size
            )));
        }

        if self.accept_timeout_ms == Some(0) {
            return Err(ConfigError::ValidationError(
                "accept_timeout_ms must be greater than 0 when set".into(),
            ));
        }

        Ok(())
    }

    /// Get the accept timeout as Duration
    #[must_use]
    pub fn accept_timeout(&self) -> Option<Duration> {
        self.accept_timeout_ms.map(Duration::from_millis)
    }

    /// Address an incoming session dials
    #[must_use]
    pub fn server_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.server_port)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            server_port: 0,
            bind_address: default_bind_address(),
            chunk_size: default_chunk_size(),
            accept_timeout_ms: None,
        }
    }
}

/// Connection registry limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    /// Maximum concurrent sessions (incoming + outgoing)
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// How long a connect may wait for the connector to report back
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl RegistryConfig {
    /// Validate registry configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "connect_timeout_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Get the connect timeout as Duration
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// Start/stop sequencing configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SequencerConfig {
    /// Watchdog duration for a pending operation in milliseconds
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
}

impl SequencerConfig {
    /// Validate sequencer configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.operation_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "operation_timeout_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Get the operation timeout as Duration
    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: default_operation_timeout_ms(),
        }
    }
}

/// TCP stand-in transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Address the stand-in transport accepts peer connections on
    #[serde(default = "default_transport_listen")]
    pub listen: SocketAddr,

    /// Enable the stand-in transport listener
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            listen: default_transport_listen(),
            enabled: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include target (module path)
    #[serde(default = "default_true")]
    pub target: bool,
}

impl LogConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.format.as_str(), "json" | "text") {
            return Err(ConfigError::ValidationError(format!(
                "log format must be \"json\" or \"text\", got \"{}\"",
                self.format
            )));
        }
        Ok(())
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            target: true,
        }
    }
}

// Default value functions for serde

const fn default_true() -> bool {
    true
}

const fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

const fn default_chunk_size() -> usize {
    crate::io::DEFAULT_CHUNK_SIZE
}

const fn default_max_connections() -> usize {
    30
}

const fn default_connect_timeout_ms() -> u64 {
    30_000
}

const fn default_operation_timeout_ms() -> u64 {
    3000
}

fn default_transport_listen() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 48620)
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}
