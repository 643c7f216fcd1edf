//! Session identification, state, and lifecycle listener

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Global counter for unique session IDs
static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier of a remote peer (e.g. its transport MAC address)
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Create a peer ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Process-unique identifier of one bridge session
///
/// Allocated from a monotonic counter, so a peer that reconnects gets a
/// fresh ID and a stale disconnect can never be mistaken for the new one.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocate the next session ID
    #[must_use]
    pub fn next() -> Self {
        Self(SESSION_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which side initiated the transport connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// The remote peer connected to us; we dial the local application
    Incoming,
    /// We connected to the remote peer; the local application dials us
    Outgoing,
}

impl Direction {
    /// Direction from the collaborator's `is_incoming` flag
    #[must_use]
    pub const fn from_is_incoming(is_incoming: bool) -> Self {
        if is_incoming {
            Self::Incoming
        } else {
            Self::Outgoing
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incoming => write!(f, "incoming"),
            Self::Outgoing => write!(f, "outgoing"),
        }
    }
}

/// One of the two copy directions inside a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Leg {
    /// Bytes read from the transport socket, written to the local socket
    TransportToLocal,
    /// Bytes read from the local socket, written to the transport socket
    LocalToTransport,
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransportToLocal => write!(f, "transport->local"),
            Self::LocalToTransport => write!(f, "local->transport"),
        }
    }
}

/// Lifecycle state of a bridge session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Sockets owned, local leg not yet established
    Created,
    /// Both sockets connected, copy loops not yet running
    StreamsEstablished,
    /// Both copy loops running
    Bridging,
    /// Both sockets closed; terminal
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::StreamsEstablished => write!(f, "streams_established"),
            Self::Bridging => write!(f, "bridging"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Immutable identity of a session, passed to every listener callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Session ID
    pub id: SessionId,
    /// Remote peer
    pub peer_id: PeerId,
    /// Who initiated the transport connection
    pub direction: Direction,
}

impl SessionInfo {
    /// Create session info with a freshly allocated ID
    #[must_use]
    pub fn new(peer_id: PeerId, direction: Direction) -> Self {
        Self {
            id: SessionId::next(),
            peer_id,
            direction,
        }
    }
}

impl fmt::Display for SessionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.direction, self.peer_id, self.id)
    }
}

/// Lifecycle notifications of a bridge session
///
/// Implemented once per session owner and injected at construction.
/// Callbacks run on the session's tasks and must not block.
pub trait SessionListener: Send + Sync {
    /// The outgoing session's loopback listener is accepting on `port`
    fn on_listening(&self, session: &SessionInfo, port: u16) {
        let _ = (session, port);
    }

    /// A chunk of `bytes` was fully written on `leg`
    fn on_data_transferred(&self, session: &SessionInfo, leg: Leg, bytes: usize) {
        let _ = (session, leg, bytes);
    }

    /// The session reached its terminal state. Fired exactly once.
    ///
    /// `error` is `None` only when the owner closed the session.
    fn on_disconnected(&self, session: &SessionInfo, error: Option<&str>);
}
