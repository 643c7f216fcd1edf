//! Configuration loading and management
//!
//! This module handles loading configuration from files and environment variables.

use std::path::Path;
use std::str::FromStr;

use tracing::{debug, info};

use super::types::Config;
use crate::error::ConfigError;

/// Load configuration from a JSON file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read or parsed.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    debug!("Loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;

    let config: Config = serde_json::from_str(&contents).map_err(|e| {
        ConfigError::ParseError(format!("Failed to parse JSON: {e} at {path:?}"))
    })?;

    config.validate()?;

    info!(
        "Configuration loaded: server_port={}, max_connections={}, operation_timeout={}ms",
        config.bridge.server_port,
        config.registry.max_connections,
        config.sequencer.operation_timeout_ms
    );

    Ok(config)
}

/// Load configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.validate()?;

    Ok(config)
}

/// Load configuration with environment variable overrides
///
/// Environment variables:
/// - `PEER_BRIDGE_SERVER_PORT`: Override the application port incoming sessions dial
/// - `PEER_BRIDGE_MAX_CONNECTIONS`: Override the registry capacity
/// - `PEER_BRIDGE_OPERATION_TIMEOUT_MS`: Override the start/stop watchdog
/// - `PEER_BRIDGE_LOG_LEVEL`: Override log level
/// - `PEER_BRIDGE_TRANSPORT_LISTEN`: Override the stand-in transport address
///
/// # Errors
///
/// Returns `ConfigError` if loading or parsing fails.
pub fn load_config_with_env(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config)?;
    config.validate()?;
    Ok(config)
}

/// Apply `PEER_BRIDGE_*` environment overrides to a loaded configuration
///
/// # Errors
///
/// Returns `ConfigError::EnvError` if a variable holds an unparseable value.
pub fn apply_env_overrides(config: &mut Config) -> Result<(), ConfigError> {
    if let Some(port) = env_parse::<u16>("PEER_BRIDGE_SERVER_PORT", "Invalid port")? {
        config.bridge.server_port = port;
        debug!("Server port overridden to {}", port);
    }

    if let Some(max) = env_parse::<usize>("PEER_BRIDGE_MAX_CONNECTIONS", "Invalid number")? {
        config.registry.max_connections = max;
        debug!("Max connections overridden to {}", max);
    }

    if let Some(ms) = env_parse::<u64>("PEER_BRIDGE_OPERATION_TIMEOUT_MS", "Invalid number")? {
        config.sequencer.operation_timeout_ms = ms;
        debug!("Operation timeout overridden to {}ms", ms);
    }

    if let Ok(level) = std::env::var("PEER_BRIDGE_LOG_LEVEL") {
        config.log.level = level;
        debug!("Log level overridden to {}", config.log.level);
    }

    if let Some(addr) = env_parse("PEER_BRIDGE_TRANSPORT_LISTEN", "Invalid socket address")? {
        config.transport.listen = addr;
        debug!("Transport listen address overridden to {}", addr);
    }

    Ok(())
}

fn env_parse<T: FromStr>(name: &str, what: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw.parse().map(Some).map_err(|_| ConfigError::EnvError {
            name: name.into(),
            reason: format!("{what}: {raw}"),
        }),
        Err(_) => Ok(None),
    }
}

/// Create a default configuration file at the given path
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be written.
pub fn create_default_config(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let config = Config::default_config();
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {e}")))?;

    std::fs::write(path, json)?;
    Ok(())
}
