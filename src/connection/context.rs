//! Bridge context
//!
//! The one object a host constructs at start-up and shares by `Arc`. It
//! owns the connection registry, the operation sequencer, and the session
//! statistics, and it is the entry point for transport sockets handed over
//! by the connector.
//!
//! Sessions never hold a reference back to the context. Each session gets
//! a small listener that carries only the registry, the statistics, and
//! the observer, and looks its own entry up by peer ID or session ID.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::registry::ConnectionRegistry;
use super::stats::{ConnectionStats, StatsSnapshot};
use crate::config::{BridgeConfig, Config};
use crate::error::{BridgeError, OperationError, RegistryError};
use crate::sequencer::{DiscoverySubsystem, OperationSequencer};
use crate::session::{
    Direction, IncomingBridgeSession, Leg, OutgoingBridgeSession, PeerId, SessionId, SessionInfo,
    SessionListener,
};
use crate::transport::TransportStream;

/// Minimum spacing of incoming-connection-failed notifications
const INCOMING_FAILURE_MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Callback receiving the outcome of [`BridgeContext::connect`]
///
/// `Ok(port)` carries the loopback port the application should connect
/// to; `Err` carries a description of why the connection was not made.
pub type ConnectCallback = Box<dyn FnOnce(Result<u16, String>) + Send>;

/// Observer of transfer activity across all sessions
///
/// This is where a discovery collaborator hangs behaviour that reacts to
/// traffic, such as lowering scan power while data flows.
pub trait TransferObserver: Send + Sync {
    /// A chunk of `bytes` was written in some session with `peer_id`
    fn on_data_transferred(&self, peer_id: &PeerId, direction: Direction, bytes: usize) {
        let _ = (peer_id, direction, bytes);
    }

    /// An incoming session bridged to `server_port` ended
    ///
    /// Rate-limited to one call per 100 ms.
    fn on_incoming_connection_failed(&self, server_port: u16) {
        let _ = server_port;
    }
}

/// A connect waiting for the connector to hand over a socket
struct PendingConnect {
    callback: ConnectCallback,
    requested_at: Instant,
}

/// State shared with the per-session listeners
struct ListenerShared {
    registry: Arc<ConnectionRegistry>,
    stats: Arc<ConnectionStats>,
    observer: Option<Arc<dyn TransferObserver>>,
    pending_connects: Mutex<HashMap<PeerId, PendingConnect>>,
    connect_timeout: Duration,
    last_incoming_failure: Mutex<Option<Instant>>,
}

impl ListenerShared {
    fn transferred(&self, session: &SessionInfo, leg: Leg, bytes: usize) {
        self.stats.record_bytes(leg, bytes);
        if let Some(observer) = &self.observer {
            observer.on_data_transferred(&session.peer_id, session.direction, bytes);
        }
    }

    fn resolve_connect(&self, peer_id: &PeerId, outcome: Result<u16, String>) -> bool {
        let pending = self.pending_connects.lock().remove(peer_id);
        match pending {
            Some(pending) => {
                (pending.callback)(outcome);
                true
            }
            None => false,
        }
    }

    fn notify_incoming_failure(&self, server_port: u16) {
        let Some(observer) = &self.observer else {
            return;
        };

        {
            let mut last = self.last_incoming_failure.lock();
            let now = Instant::now();
            if matches!(*last, Some(at) if now.duration_since(at) <= INCOMING_FAILURE_MIN_INTERVAL) {
                return;
            }
            *last = Some(now);
        }
        observer.on_incoming_connection_failed(server_port);
    }
}

struct OutgoingListener {
    shared: Arc<ListenerShared>,
}

impl SessionListener for OutgoingListener {
    fn on_listening(&self, session: &SessionInfo, port: u16) {
        info!(
            "Outgoing connection to {} is using port {}",
            session.peer_id, port
        );
        if !self.shared.resolve_connect(&session.peer_id, Ok(port)) {
            debug!("No pending connect for {}", session.peer_id);
        }
    }

    fn on_data_transferred(&self, session: &SessionInfo, leg: Leg, bytes: usize) {
        self.shared.transferred(session, leg, bytes);
    }

    fn on_disconnected(&self, session: &SessionInfo, error: Option<&str>) {
        warn!(
            "Outgoing connection to {} disconnected: {}",
            session.peer_id,
            error.unwrap_or("closed")
        );
        self.shared
            .registry
            .remove_outgoing_session(&session.peer_id, session.id);
        self.shared.stats.record_finished(error.is_none());
    }
}

struct IncomingListener {
    shared: Arc<ListenerShared>,
    server_port: u16,
}

impl SessionListener for IncomingListener {
    fn on_data_transferred(&self, session: &SessionInfo, leg: Leg, bytes: usize) {
        self.shared.transferred(session, leg, bytes);
    }

    fn on_disconnected(&self, session: &SessionInfo, error: Option<&str>) {
        warn!(
            "Incoming connection from {} disconnected: {}",
            session.peer_id,
            error.unwrap_or("closed")
        );
        self.shared.registry.remove_incoming(session.id);
        self.shared.stats.record_finished(error.is_none());
        self.shared.notify_incoming_failure(self.server_port);
    }
}

/// Explicit context replacing a process-wide connection helper
pub struct BridgeContext {
    bridge: BridgeConfig,
    server_port: AtomicU16,
    shared: Arc<ListenerShared>,
    sequencer: OperationSequencer,
    disposed: AtomicBool,
}

impl BridgeContext {
    /// Create a context from configuration
    pub fn new(
        config: &Config,
        subsystem: Arc<dyn DiscoverySubsystem>,
        observer: Option<Arc<dyn TransferObserver>>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(config.registry.max_connections));
        let sequencer =
            OperationSequencer::new(subsystem, config.sequencer.operation_timeout());

        Self {
            bridge: config.bridge.clone(),
            server_port: AtomicU16::new(config.bridge.server_port),
            shared: Arc::new(ListenerShared {
                registry,
                stats: Arc::new(ConnectionStats::new()),
                observer,
                pending_connects: Mutex::new(HashMap::new()),
                connect_timeout: config.registry.connect_timeout(),
                last_incoming_failure: Mutex::new(None),
            }),
            sequencer,
            disposed: AtomicBool::new(false),
        }
    }

    fn ensure_running(&self) -> Result<(), BridgeError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(BridgeError::ShuttingDown);
        }
        Ok(())
    }

    /// Start discovery, recording `server_port` when it is non-zero
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::ShuttingDown` after [`dispose`](Self::dispose).
    /// Operation outcomes go to `callback`.
    pub fn start<F>(&self, server_port: u16, advertise: bool, callback: F) -> Result<(), BridgeError>
    where
        F: FnOnce(Result<(), OperationError>) + Send + 'static,
    {
        self.ensure_running()?;
        if server_port > 0 {
            self.server_port.store(server_port, Ordering::Release);
        }
        info!(
            "Starting: server port {}, advertise {}",
            self.server_port(),
            advertise
        );
        self.sequencer.execute_start(advertise, callback);
        Ok(())
    }

    /// Stop listening only, or stop everything and close outgoing sessions
    pub fn stop<F>(&self, stop_only_listening: bool, callback: F)
    where
        F: FnOnce(Result<(), OperationError>) + Send + 'static,
    {
        if stop_only_listening {
            info!("Stopping only listening for advertisements");
        } else {
            info!("Stopping all activities and closing outgoing connections");
        }

        self.sequencer.execute_stop(stop_only_listening, callback);

        if !stop_only_listening {
            self.shared
                .registry
                .close_and_remove_all(Direction::Outgoing);
        }
    }

    /// Prepare an outgoing connection to `peer_id`
    ///
    /// The connector is expected to dial the peer afterwards and hand the
    /// socket to [`on_transport_socket_ready`](Self::on_transport_socket_ready),
    /// or report failure through
    /// [`on_connection_failed`](Self::on_connection_failed). A connect it
    /// never reports on expires after `registry.connect_timeout_ms`: the
    /// next call to `connect` fails its callback and frees the peer.
    ///
    /// # Errors
    ///
    /// - `RegistryError::DuplicateOutgoing` if the peer already has an
    ///   outgoing session or a connect in progress
    /// - `RegistryError::CapacityExceeded` if the outgoing limit is reached
    /// - `BridgeError::ShuttingDown` after [`dispose`](Self::dispose)
    pub fn connect<F>(&self, peer_id: &PeerId, callback: F) -> Result<(), BridgeError>
    where
        F: FnOnce(Result<u16, String>) + Send + 'static,
    {
        self.ensure_running()?;
        let registry = &self.shared.registry;

        if registry.has_outgoing(peer_id) {
            warn!("Already have an outgoing connection to {}", peer_id);
            return Err(RegistryError::duplicate_outgoing(peer_id).into());
        }
        if registry.has_incoming(peer_id) {
            info!(
                "Already have an incoming connection from {}, connecting anyway",
                peer_id
            );
        }
        if registry.has_maximum_connections() {
            let current = registry.count(Direction::Outgoing);
            warn!("Maximum number of outgoing connections ({}) reached", current);
            return Err(RegistryError::capacity_exceeded(current, registry.capacity()).into());
        }

        let now = Instant::now();
        let connect_timeout = self.shared.connect_timeout;
        let (expired, accepted) = {
            let mut pending = self.shared.pending_connects.lock();

            // Connects the connector never reported back on
            let stale: Vec<PeerId> = pending
                .iter()
                .filter(|(_, p)| now.duration_since(p.requested_at) >= connect_timeout)
                .map(|(peer, _)| peer.clone())
                .collect();
            let expired: Vec<(PeerId, PendingConnect)> = stale
                .into_iter()
                .filter_map(|peer| pending.remove_entry(&peer))
                .collect();

            let accepted = !pending.contains_key(peer_id);
            if accepted {
                pending.insert(
                    peer_id.clone(),
                    PendingConnect {
                        callback: Box::new(callback),
                        requested_at: now,
                    },
                );
            }
            (expired, accepted)
        };

        for (peer, stale) in expired {
            warn!("Connect to {} expired after {:?}", peer, connect_timeout);
            (stale.callback)(Err(format!(
                "Connection to peer {peer} timed out after {}ms",
                connect_timeout.as_millis()
            )));
        }

        if !accepted {
            return Err(RegistryError::duplicate_outgoing(peer_id).into());
        }
        debug!("Connect to {} pending", peer_id);
        Ok(())
    }

    /// The connector failed to reach `peer_id`
    ///
    /// Returns whether a pending connect was resolved.
    pub fn on_connection_failed(&self, peer_id: &PeerId, message: &str) -> bool {
        warn!("Connection to {} failed: {}", peer_id, message);
        self.shared.resolve_connect(
            peer_id,
            Err(format!("Connection to peer {peer_id} failed: {message}")),
        )
    }

    /// Take ownership of a live transport socket and start bridging it
    ///
    /// Returns the new session's ID. On failure the socket is dropped,
    /// which closes it, and a pending connect for the peer is resolved
    /// with the error.
    ///
    /// # Errors
    ///
    /// - `BridgeError::Session` if the local socket cannot be created
    /// - `BridgeError::Registry` if the registry rejects the session
    /// - `BridgeError::ShuttingDown` after [`dispose`](Self::dispose)
    pub async fn on_transport_socket_ready(
        &self,
        socket: impl TransportStream,
        peer_id: PeerId,
        is_incoming: bool,
    ) -> Result<SessionId, BridgeError> {
        let direction = Direction::from_is_incoming(is_incoming);
        info!("Transport socket ready: {} {}", direction, peer_id);

        let result = match direction {
            Direction::Outgoing => self.start_outgoing(socket, &peer_id).await,
            Direction::Incoming => self.start_incoming(socket, &peer_id).await,
        };

        if let Err(e) = &result {
            self.shared.stats.record_rejected();
            warn!("Failed to bridge {} {}: {}", direction, peer_id, e);
            if direction == Direction::Outgoing {
                self.shared.resolve_connect(&peer_id, Err(e.to_string()));
            }
        }
        result
    }

    async fn start_outgoing(
        &self,
        socket: impl TransportStream,
        peer_id: &PeerId,
    ) -> Result<SessionId, BridgeError> {
        self.ensure_running()?;
        let listener = Arc::new(OutgoingListener {
            shared: Arc::clone(&self.shared),
        });

        let session =
            OutgoingBridgeSession::bind(socket, peer_id.clone(), &self.bridge, listener).await?;
        self.shared.registry.try_add_outgoing(session.handle())?;

        if self.disposed.load(Ordering::Acquire) {
            self.shared
                .registry
                .remove_outgoing_session(peer_id, session.handle().id());
            return Err(BridgeError::ShuttingDown);
        }

        self.shared.stats.record_accepted();
        Ok(session.start().id())
    }

    async fn start_incoming(
        &self,
        socket: impl TransportStream,
        peer_id: &PeerId,
    ) -> Result<SessionId, BridgeError> {
        self.ensure_running()?;
        let registry = &self.shared.registry;

        // Refuse before dialing so the application never sees a stray connection
        if registry.is_full() {
            return Err(RegistryError::capacity_exceeded(registry.total(), registry.capacity()).into());
        }

        let config = self.bridge_config();
        let listener = Arc::new(IncomingListener {
            shared: Arc::clone(&self.shared),
            server_port: config.server_port,
        });

        let session =
            IncomingBridgeSession::connect(socket, peer_id.clone(), &config, listener).await?;
        let handle = session.handle();
        registry.try_add_incoming(handle.clone())?;

        if self.disposed.load(Ordering::Acquire) {
            registry.remove_incoming(handle.id());
            return Err(BridgeError::ShuttingDown);
        }

        self.shared.stats.record_accepted();
        Ok(session.start().id())
    }

    /// Close the outgoing session to `peer_id`
    pub fn disconnect_outgoing(&self, peer_id: &PeerId) -> bool {
        let closed = self.shared.registry.close_and_remove_outgoing(peer_id);
        if closed {
            info!("Disconnected outgoing connection to {}", peer_id);
        } else {
            warn!("No outgoing connection to {} to disconnect", peer_id);
        }
        closed
    }

    /// Close every session
    ///
    /// Returns the number of incoming sessions killed.
    pub fn kill_all_connections(&self) -> usize {
        let registry = &self.shared.registry;
        registry.close_and_remove_all(Direction::Outgoing);
        registry.close_and_remove_all(Direction::Incoming)
    }

    /// The discovery subsystem reported a state change
    pub fn on_subsystem_state_changed(&self) {
        self.sequencer.check_current_operation_status();
    }

    /// Check if the outgoing connection limit is reached
    #[must_use]
    pub fn has_maximum_connections(&self) -> bool {
        self.shared.registry.has_maximum_connections()
    }

    /// Loopback port incoming sessions are bridged to (0 = unset)
    #[must_use]
    pub fn server_port(&self) -> u16 {
        self.server_port.load(Ordering::Acquire)
    }

    /// Bridge configuration with the current server port applied
    #[must_use]
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            server_port: self.server_port(),
            ..self.bridge.clone()
        }
    }

    /// Statistics snapshot
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Connection registry
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.shared.registry
    }

    /// Operation sequencer
    #[must_use]
    pub fn sequencer(&self) -> &OperationSequencer {
        &self.sequencer
    }

    /// Check if [`dispose`](Self::dispose) has been called
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Shut the context down
    ///
    /// Cancels the pending operation without calling its callback, fails
    /// pending connects, and closes every session. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Disposing bridge context");

        self.sequencer.cancel_current_operation();

        let pending: Vec<(PeerId, PendingConnect)> =
            self.shared.pending_connects.lock().drain().collect();
        for (peer_id, pending) in pending {
            debug!("Failing pending connect to {}", peer_id);
            (pending.callback)(Err(BridgeError::ShuttingDown.to_string()));
        }

        let killed = self.kill_all_connections();
        debug!("Disposed; {} incoming connection(s) killed", killed);
    }
}

impl std::fmt::Debug for BridgeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeContext")
            .field("server_port", &self.server_port())
            .field("registry", &self.shared.registry)
            .field("sequencer", &self.sequencer)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
