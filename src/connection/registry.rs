//! Connection registry
//!
//! Tracks live bridge sessions in two namespaces: outgoing sessions keyed
//! by peer (at most one per peer) and incoming sessions keyed by session
//! ID (any number per peer). The capacity bounds both namespaces together.
//!
//! Every operation takes the registry lock once. Check-and-insert happens
//! under a single write guard, so two concurrent adds for the same peer
//! cannot both succeed. Sessions are closed only after the guard is
//! released; `close` never calls back into the registry synchronously,
//! but a session's disconnect callback may.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::RegistryError;
use crate::session::{BridgeSession, Direction, PeerId, SessionId};

#[derive(Default)]
struct Inner {
    outgoing: HashMap<PeerId, BridgeSession>,
    incoming: HashMap<SessionId, BridgeSession>,
}

impl Inner {
    fn total(&self) -> usize {
        self.outgoing.len() + self.incoming.len()
    }
}

/// Registry of active bridge sessions
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
    capacity: usize,
}

impl ConnectionRegistry {
    /// Create a registry holding at most `capacity` sessions
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            capacity,
        }
    }

    /// Register an outgoing session
    ///
    /// # Errors
    ///
    /// - `RegistryError::DuplicateOutgoing` if the peer already has an
    ///   outgoing session
    /// - `RegistryError::CapacityExceeded` if the registry is full
    pub fn try_add_outgoing(&self, session: BridgeSession) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();

        if inner.outgoing.contains_key(session.peer_id()) {
            return Err(RegistryError::duplicate_outgoing(session.peer_id()));
        }
        let total = inner.total();
        if total >= self.capacity {
            return Err(RegistryError::capacity_exceeded(total, self.capacity));
        }

        debug!(
            "Registered outgoing session {} ({}/{})",
            session.info(),
            total + 1,
            self.capacity
        );
        inner.outgoing.insert(session.peer_id().clone(), session);
        Ok(())
    }

    /// Register an outgoing session, returning whether it was inserted
    pub fn add_outgoing(&self, session: BridgeSession) -> bool {
        self.try_add_outgoing(session).is_ok()
    }

    /// Register an incoming session
    ///
    /// Incoming sessions have no per-peer uniqueness constraint.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::CapacityExceeded` if the registry is full.
    pub fn try_add_incoming(&self, session: BridgeSession) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();

        let total = inner.total();
        if total >= self.capacity {
            return Err(RegistryError::capacity_exceeded(total, self.capacity));
        }

        debug!(
            "Registered incoming session {} ({}/{})",
            session.info(),
            total + 1,
            self.capacity
        );
        inner.incoming.insert(session.id(), session);
        Ok(())
    }

    /// Register an incoming session, returning whether it was inserted
    pub fn add_incoming(&self, session: BridgeSession) -> bool {
        self.try_add_incoming(session).is_ok()
    }

    /// Remove the peer's outgoing session
    ///
    /// Returns whether an entry was present. The session is not closed.
    pub fn remove_outgoing(&self, peer_id: &PeerId) -> bool {
        self.inner.write().outgoing.remove(peer_id).is_some()
    }

    /// Remove the peer's outgoing session only if it is session `id`
    ///
    /// Used from disconnect callbacks: a late callback from an old session
    /// must not evict a newer session for the same peer.
    pub fn remove_outgoing_session(&self, peer_id: &PeerId, id: SessionId) -> bool {
        let mut inner = self.inner.write();
        match inner.outgoing.get(peer_id) {
            Some(existing) if existing.id() == id => {
                inner.outgoing.remove(peer_id);
                true
            }
            _ => false,
        }
    }

    /// Remove an incoming session. Returns whether an entry was present.
    pub fn remove_incoming(&self, id: SessionId) -> bool {
        self.inner.write().incoming.remove(&id).is_some()
    }

    /// Remove and close the peer's outgoing session
    pub fn close_and_remove_outgoing(&self, peer_id: &PeerId) -> bool {
        let removed = self.inner.write().outgoing.remove(peer_id);
        match removed {
            Some(session) => {
                session.close();
                true
            }
            None => false,
        }
    }

    /// Close every session in `direction` and clear that namespace
    ///
    /// Returns the number of sessions removed. Sessions that remove
    /// themselves during the sweep are simply absent from it.
    pub fn close_and_remove_all(&self, direction: Direction) -> usize {
        let drained: Vec<BridgeSession> = {
            let mut inner = self.inner.write();
            match direction {
                Direction::Outgoing => inner.outgoing.drain().map(|(_, s)| s).collect(),
                Direction::Incoming => inner.incoming.drain().map(|(_, s)| s).collect(),
            }
        };

        if !drained.is_empty() {
            warn!("Closing {} {} session(s)", drained.len(), direction);
        }
        for session in &drained {
            session.close();
        }
        drained.len()
    }

    /// Number of sessions in `direction`
    #[must_use]
    pub fn count(&self, direction: Direction) -> usize {
        let inner = self.inner.read();
        match direction {
            Direction::Outgoing => inner.outgoing.len(),
            Direction::Incoming => inner.incoming.len(),
        }
    }

    /// Number of sessions in both directions
    #[must_use]
    pub fn total(&self) -> usize {
        self.inner.read().total()
    }

    /// Check if the peer has any session, in either direction
    #[must_use]
    pub fn has_connection(&self, peer_id: &PeerId) -> bool {
        let inner = self.inner.read();
        inner.outgoing.contains_key(peer_id)
            || inner.incoming.values().any(|s| s.peer_id() == peer_id)
    }

    /// Check if the peer has an outgoing session
    #[must_use]
    pub fn has_outgoing(&self, peer_id: &PeerId) -> bool {
        self.inner.read().outgoing.contains_key(peer_id)
    }

    /// Check if the peer has at least one incoming session
    #[must_use]
    pub fn has_incoming(&self, peer_id: &PeerId) -> bool {
        self.inner
            .read()
            .incoming
            .values()
            .any(|s| s.peer_id() == peer_id)
    }

    /// Get the peer's outgoing session
    #[must_use]
    pub fn outgoing(&self, peer_id: &PeerId) -> Option<BridgeSession> {
        self.inner.read().outgoing.get(peer_id).cloned()
    }

    /// Check if the outgoing namespace has reached capacity
    #[must_use]
    pub fn has_maximum_connections(&self) -> bool {
        self.inner.read().outgoing.len() >= self.capacity
    }

    /// Check if no further session of either direction fits
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.inner.read().total() >= self.capacity
    }

    /// Maximum number of sessions
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("ConnectionRegistry")
            .field("outgoing", &inner.outgoing.len())
            .field("incoming", &inner.incoming.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
