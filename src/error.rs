//! Error types for peer-bridge
//!
//! This module defines the error hierarchy for the bridging core.
//! All errors are categorized by subsystem and include recovery hints.
//!
//! Session-level I/O failures never surface through these types once a
//! session is running: they are folded into the session's single
//! `on_disconnected` notification. The types here cover what callers see
//! synchronously (construction, registration, configuration) and the
//! outcome of start/stop operations.

use std::io;

use thiserror::Error;

use crate::sequencer::OperationKind;
use crate::session::PeerId;

/// Top-level error type for peer-bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Configuration errors (file parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Bridge session construction errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Connection registry rejections
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Start/stop operation errors
    #[error("Operation error: {0}")]
    Operation(#[from] OperationError),

    /// The bridge context has been disposed
    #[error("Bridge context is shutting down")]
    ShuttingDown,

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl BridgeError {
    /// Check if this error is recoverable (can retry operation)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(e) => e.is_recoverable(),
            Self::Session(e) => e.is_recoverable(),
            Self::Registry(e) => e.is_recoverable(),
            Self::Operation(e) => e.is_recoverable(),
            Self::ShuttingDown => false,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
            ),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Config errors are generally not recoverable without user intervention
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }
}

/// Stage of local socket construction that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketStage {
    /// Binding the loopback listener of an outgoing session
    Bind,
    /// Waiting for the application to connect to an outgoing session
    Accept,
    /// Dialing the application port for an incoming session
    Connect,
}

impl std::fmt::Display for SocketStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bind => write!(f, "bind"),
            Self::Accept => write!(f, "accept"),
            Self::Connect => write!(f, "connect"),
        }
    }
}

/// Bridge session errors
#[derive(Debug, Error)]
pub enum SessionError {
    /// The local loopback leg could not be created
    #[error("Failed to {stage} local socket: {reason}")]
    SocketConstruction { stage: SocketStage, reason: String },

    /// I/O failure while bridging
    #[error("Stream copy failed: {0}")]
    StreamCopy(String),
}

impl SessionError {
    /// Check if this error is recoverable
    ///
    /// A failed dial may succeed once the application is listening, so
    /// connect failures are worth retrying by the owner. Bind failures on
    /// loopback indicate local resource exhaustion.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::SocketConstruction { stage, .. } => *stage != SocketStage::Bind,
            Self::StreamCopy(_) => false,
        }
    }

    /// Create a socket construction error
    pub fn construction(stage: SocketStage, reason: impl Into<String>) -> Self {
        Self::SocketConstruction {
            stage,
            reason: reason.into(),
        }
    }
}

/// Connection registry rejections
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Global connection cap reached
    #[error("Maximum number of peer connections ({current}/{max}) reached, please try again after disconnecting a peer")]
    CapacityExceeded { current: usize, max: usize },

    /// An outgoing session for this peer is already connecting or connected
    #[error("We already have an outgoing connection to peer with ID {peer_id}")]
    DuplicateOutgoing { peer_id: PeerId },
}

impl RegistryError {
    /// Capacity frees up as sessions end; a duplicate stays a duplicate
    /// until the existing session is gone, so neither is retried internally.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::CapacityExceeded { .. } => true,
            Self::DuplicateOutgoing { .. } => false,
        }
    }

    /// Create a capacity exceeded error
    pub const fn capacity_exceeded(current: usize, max: usize) -> Self {
        Self::CapacityExceeded { current, max }
    }

    /// Create a duplicate outgoing error
    pub fn duplicate_outgoing(peer_id: &PeerId) -> Self {
        Self::DuplicateOutgoing {
            peer_id: peer_id.clone(),
        }
    }
}

/// Start/stop operation errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OperationError {
    /// The watchdog fired before the subsystem reached the target state.
    /// The subsystem's real state is unknown and must be re-queried.
    #[error("{kind} operation timed out after {elapsed_ms}ms")]
    Timeout { kind: OperationKind, elapsed_ms: u64 },

    /// Another operation is still pending
    #[error("Cannot execute {requested} operation, {pending} operation is still pending")]
    Busy {
        requested: OperationKind,
        pending: OperationKind,
    },

    /// The subsystem refused the request outright
    #[error("Operation failed: {0}")]
    Failed(String),
}

impl OperationError {
    /// Check if this error is recoverable
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Busy { .. } => true,
            Self::Failed(_) => false,
        }
    }

    /// Check if this is a timeout outcome
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Type alias for Result with BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;
