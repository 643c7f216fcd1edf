//! peer-bridge: TCP bridging over a peer-to-peer byte-stream transport
//!
//! This crate lets an application that only speaks TCP talk to peers
//! reachable over a point-to-point transport such as Bluetooth RFCOMM.
//! Each transport socket handed over by the connector is paired with a
//! loopback TCP socket, and bytes are copied both ways unmodified.
//!
//! # Features
//!
//! - **Bridge sessions**: outgoing (application dials an ephemeral
//!   loopback port) and incoming (we dial the application's port)
//! - **Connection registry**: one outgoing session per peer, a global
//!   session cap, race-free add/remove
//! - **Operation sequencer**: one start/stop request at a time against a
//!   discovery subsystem that converges asynchronously, with a watchdog
//! - **Statistics**: per-direction byte counters and session outcomes
//!
//! # Architecture
//!
//! ```text
//! connector ──transport socket──▶ BridgeContext ──▶ ConnectionRegistry
//!                                      │
//!                                      ▼
//!             transport ◀──StreamBridge x2──▶ 127.0.0.1:port ◀── application
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use peer_bridge::config::load_config;
//! use peer_bridge::connection::BridgeContext;
//! use peer_bridge::sequencer::MockDiscovery;
//! use peer_bridge::session::PeerId;
//!
//! # async fn example(socket: tokio::io::DuplexStream) -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("/etc/peer-bridge/config.json")?;
//! let ctx = Arc::new(BridgeContext::new(&config, Arc::new(MockDiscovery::immediate()), None));
//!
//! ctx.start(8080, true, |outcome| println!("start: {outcome:?}"))?;
//! ctx.connect(&PeerId::from("AA:BB"), |port| println!("listening on {port:?}"))?;
//!
//! // Later, once the connector has a socket to AA:BB:
//! ctx.on_transport_socket_ready(socket, PeerId::from("AA:BB"), false).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration types and loading
//! - [`connection`]: Registry, statistics, and the bridge context
//! - [`error`]: Error types
//! - [`io`]: The chunked stream copy
//! - [`sequencer`]: Start/stop operation sequencing
//! - [`session`]: Bridge sessions
//! - [`transport`]: Transport socket boundary and TCP stand-in

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod connection;
pub mod error;
pub mod io;
pub mod sequencer;
pub mod session;
pub mod transport;

// Re-export commonly used types at the crate root
pub use config::Config;
pub use connection::{BridgeContext, ConnectionRegistry, ConnectionStats, TransferObserver};
pub use error::{BridgeError, ConfigError, OperationError, RegistryError, SessionError};
pub use io::StreamBridge;
pub use sequencer::{DiscoverySubsystem, MockDiscovery, OperationSequencer};
pub use session::{BridgeSession, Direction, PeerId, SessionId, SessionListener};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
