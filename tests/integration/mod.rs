//! Integration tests for peer-bridge
//!
//! # Test Organization
//!
//! - `bridge_scenario`: end-to-end sessions over real loopback TCP with an
//!   in-memory transport
//! - `registry_concurrency`: registry invariants under parallel callers
//! - `sequencer_timing`: watchdog timing and resolution races on a paused
//!   clock
//!
//! All tests run without network access beyond 127.0.0.1.

pub mod bridge_scenario;
pub mod registry_concurrency;
pub mod sequencer_timing;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use peer_bridge::config::BridgeConfig;
use peer_bridge::session::{BridgeSession, OutgoingBridgeSession, PeerId, SessionInfo, SessionListener};

/// Session lifecycle event as seen by a listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Listening(u16),
    Disconnected(PeerId, Option<String>),
}

/// Listener forwarding events to a channel and counting bytes
pub struct RecordingListener {
    tx: mpsc::UnboundedSender<Event>,
    pub bytes: Mutex<usize>,
}

impl RecordingListener {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                tx,
                bytes: Mutex::new(0),
            }),
            rx,
        )
    }
}

impl SessionListener for RecordingListener {
    fn on_listening(&self, _session: &SessionInfo, port: u16) {
        let _ = self.tx.send(Event::Listening(port));
    }

    fn on_data_transferred(
        &self,
        _session: &SessionInfo,
        _leg: peer_bridge::session::Leg,
        bytes: usize,
    ) {
        *self.bytes.lock() += bytes;
    }

    fn on_disconnected(&self, session: &SessionInfo, error: Option<&str>) {
        let _ = self.tx.send(Event::Disconnected(
            session.peer_id.clone(),
            error.map(str::to_owned),
        ));
    }
}

struct Silent;

impl SessionListener for Silent {
    fn on_disconnected(&self, _session: &SessionInfo, _error: Option<&str>) {}
}

/// A bound, never-started outgoing session handle for registry tests
pub async fn idle_handle(peer: &str) -> BridgeSession {
    let (transport, _remote) = tokio::io::duplex(64);
    OutgoingBridgeSession::bind(
        transport,
        PeerId::from(peer),
        &BridgeConfig::default(),
        Arc::new(Silent),
    )
    .await
    .unwrap()
    .handle()
}
