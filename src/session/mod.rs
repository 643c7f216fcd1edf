//! Bridge sessions
//!
//! A bridge session pairs one transport socket with one loopback TCP
//! socket and copies bytes both ways until either side ends.
//!
//! - [`OutgoingBridgeSession`]: we dialed the peer; the application
//!   connects to an ephemeral loopback listener.
//! - [`IncomingBridgeSession`]: the peer dialed us; we connect to the
//!   application's port.
//!
//! Both are built in two phases. Construction (`bind` / `connect`) creates
//! the local socket and fails synchronously with
//! [`SessionError`](crate::error::SessionError). `start` then spawns the
//! session's tasks and returns a [`BridgeSession`] handle. From that point
//! every outcome is delivered through the session's [`SessionListener`],
//! and `on_disconnected` fires exactly once.

mod bridge;
mod incoming;
mod outgoing;
mod types;

pub use bridge::BridgeSession;
pub use incoming::IncomingBridgeSession;
pub use outgoing::OutgoingBridgeSession;
pub use types::{Direction, Leg, PeerId, SessionId, SessionInfo, SessionListener, SessionState};
