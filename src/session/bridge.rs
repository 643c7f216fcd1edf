//! Shared bridge session machinery
//!
//! Both session flavours end up in the same place: one transport socket,
//! one connected loopback `TcpStream`, and two [`StreamBridge`] tasks
//! copying between them. This module owns that part plus the handle the
//! registry stores.
//!
//! # Teardown
//!
//! Each session has one supervisor task. It waits for whichever comes
//! first: either copy direction ending, or the owner calling
//! [`BridgeSession::close`]. It then aborts the remaining direction and
//! waits for both tasks to drop their socket halves before marking the
//! session `Closed` and firing `on_disconnected`. The second direction's
//! termination is part of teardown and is never reported on its own.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use super::types::{Direction, Leg, PeerId, SessionId, SessionInfo, SessionListener, SessionState};
use crate::error::SessionError;
use crate::io::{CopyOutcome, StreamBridge};
use crate::transport::BoxedTransport;

/// State shared between a session's handle(s) and its supervisor task
pub(crate) struct SessionShared {
    info: SessionInfo,
    state: Mutex<SessionState>,
    bytes_to_local: AtomicU64,
    bytes_to_transport: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    reported: AtomicBool,
}

impl SessionShared {
    pub(crate) fn new(peer_id: PeerId, direction: Direction) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            info: SessionInfo::new(peer_id, direction),
            state: Mutex::new(SessionState::Created),
            bytes_to_local: AtomicU64::new(0),
            bytes_to_transport: AtomicU64::new(0),
            shutdown_tx,
            reported: AtomicBool::new(false),
        })
    }

    pub(crate) fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub(crate) fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock();
        // Closed is terminal
        if *state != SessionState::Closed {
            trace!("Session {} state {} -> {}", self.info, *state, next);
            *state = next;
        }
    }

    pub(crate) fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    fn record(&self, leg: Leg, bytes: usize) {
        let counter = match leg {
            Leg::TransportToLocal => &self.bytes_to_local,
            Leg::LocalToTransport => &self.bytes_to_transport,
        };
        counter.fetch_add(bytes as u64, Ordering::Relaxed);
    }
}

/// Cloneable handle to a bridge session
///
/// The handle is what the connection registry stores. It exposes the
/// session's identity and counters and the idempotent [`close`](Self::close);
/// it gives no access to the sockets, which stay owned by the session's
/// tasks.
#[derive(Clone)]
pub struct BridgeSession {
    shared: Arc<SessionShared>,
}

impl BridgeSession {
    pub(crate) fn from_shared(shared: Arc<SessionShared>) -> Self {
        Self { shared }
    }

    /// Session ID
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.shared.info.id
    }

    /// Remote peer
    #[must_use]
    pub fn peer_id(&self) -> &PeerId {
        &self.shared.info.peer_id
    }

    /// Session direction
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.shared.info.direction
    }

    /// Full session identity
    #[must_use]
    pub fn info(&self) -> &SessionInfo {
        &self.shared.info
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.shared.state.lock()
    }

    /// Check if the session has reached its terminal state
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Bytes copied from the transport socket to the local socket
    #[must_use]
    pub fn bytes_to_local(&self) -> u64 {
        self.shared.bytes_to_local.load(Ordering::Relaxed)
    }

    /// Bytes copied from the local socket to the transport socket
    #[must_use]
    pub fn bytes_to_transport(&self) -> u64 {
        self.shared.bytes_to_transport.load(Ordering::Relaxed)
    }

    /// Total bytes transferred in both directions
    #[must_use]
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_to_local() + self.bytes_to_transport()
    }

    /// Close both sockets
    ///
    /// Idempotent and callable from any thread or state. Closing unblocks
    /// any copy in progress; the session then reports `on_disconnected`
    /// with no error. Returns `true` for the call that actually initiated
    /// the close.
    pub fn close(&self) -> bool {
        let first = !self.shared.shutdown_tx.send_replace(true);
        if first {
            debug!("Closing session {}", self.shared.info);
        }
        first
    }
}

impl std::fmt::Debug for BridgeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeSession")
            .field("info", &self.shared.info)
            .field("state", &self.state())
            .field("bytes_transferred", &self.bytes_transferred())
            .finish()
    }
}

/// Per-session pieces shared by the outgoing and incoming flavours
pub(crate) struct SessionCore {
    pub(crate) shared: Arc<SessionShared>,
    pub(crate) listener: Arc<dyn SessionListener>,
    pub(crate) chunk_size: usize,
}

impl SessionCore {
    pub(crate) fn new(
        peer_id: PeerId,
        direction: Direction,
        listener: Arc<dyn SessionListener>,
        chunk_size: usize,
    ) -> Self {
        Self {
            shared: SessionShared::new(peer_id, direction),
            listener,
            chunk_size,
        }
    }

    pub(crate) fn handle(&self) -> BridgeSession {
        BridgeSession::from_shared(Arc::clone(&self.shared))
    }

    pub(crate) fn info(&self) -> &SessionInfo {
        self.shared.info()
    }

    fn spawn_leg<R, W>(&self, leg: Leg, reader: R, writer: W) -> JoinHandle<CopyOutcome>
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
        W: tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        let listener = Arc::clone(&self.listener);
        let copy = StreamBridge::new(reader, writer, self.chunk_size).with_progress(move |n| {
            shared.record(leg, n);
            listener.on_data_transferred(shared.info(), leg, n);
        });
        tokio::spawn(copy)
    }

    /// Run both copy directions until one ends or the session is closed
    ///
    /// Returns the disconnect reason: `None` when the owner closed the
    /// session, otherwise a description of which leg ended and why.
    pub(crate) async fn bridge(
        &self,
        transport: BoxedTransport,
        local: TcpStream,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Option<String> {
        let (transport_rd, transport_wr) = tokio::io::split(transport);
        let (local_rd, local_wr) = local.into_split();

        let mut to_local = self.spawn_leg(Leg::TransportToLocal, transport_rd, local_wr);
        let mut to_transport = self.spawn_leg(Leg::LocalToTransport, local_rd, transport_wr);
        self.shared.set_state(SessionState::Bridging);
        debug!("Session {} bridging", self.info());

        tokio::select! {
            result = &mut to_local => {
                to_transport.abort();
                let _ = to_transport.await;
                Some(describe_end(Leg::TransportToLocal, result))
            }
            result = &mut to_transport => {
                to_local.abort();
                let _ = to_local.await;
                Some(describe_end(Leg::LocalToTransport, result))
            }
            () = wait_for_close(shutdown_rx) => {
                to_local.abort();
                to_transport.abort();
                let _ = to_local.await;
                let _ = to_transport.await;
                None
            }
        }
    }

    /// Mark the session terminal and report the disconnect exactly once
    pub(crate) fn finish(&self, error: Option<String>) {
        self.shared.set_state(SessionState::Closed);
        if self.shared.reported.swap(true, Ordering::AcqRel) {
            return;
        }

        let handle = self.handle();
        info!(
            "Session {} disconnected ({} bytes to local, {} bytes to transport){}",
            self.info(),
            handle.bytes_to_local(),
            handle.bytes_to_transport(),
            error.as_deref().map(|e| format!(": {e}")).unwrap_or_default()
        );
        self.listener.on_disconnected(self.info(), error.as_deref());
    }
}

/// Resolve once the session's close flag is set
pub(crate) async fn wait_for_close(shutdown_rx: &mut watch::Receiver<bool>) {
    // The sender lives in SessionShared, which the caller keeps alive
    let _ = shutdown_rx.wait_for(|closed| *closed).await;
}

fn describe_end(leg: Leg, result: Result<CopyOutcome, tokio::task::JoinError>) -> String {
    let source = match leg {
        Leg::TransportToLocal => "Transport",
        Leg::LocalToTransport => "Local",
    };
    match result {
        Ok(CopyOutcome { error: None, .. }) => format!("{source} stream closed"),
        Ok(CopyOutcome { error: Some(e), .. }) => {
            SessionError::StreamCopy(format!("{leg}: {e}")).to_string()
        }
        Err(e) => SessionError::StreamCopy(format!("{leg} task: {e}")).to_string(),
    }
}
