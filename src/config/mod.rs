//! Configuration module for peer-bridge
//!
//! This module provides configuration types and loading utilities.
//!
//! # Example
//!
//! ```no_run
//! use peer_bridge::config::{load_config, Config};
//!
//! let config = load_config("/etc/peer-bridge/config.json").unwrap();
//! println!("Max connections: {}", config.registry.max_connections);
//! ```

mod loader;
mod types;

pub use loader::{
    apply_env_overrides, create_default_config, load_config, load_config_str,
    load_config_with_env,
};
pub use types::{
    BridgeConfig, Config, LogConfig, RegistryConfig, SequencerConfig, TransportConfig,
};
