//! Outgoing bridge session
//!
//! We connected to the remote peer; the local application reaches it by
//! connecting to a short-lived loopback listener. The listener binds to an
//! OS-assigned port (or a caller-chosen one), reports it through
//! `on_listening`, accepts exactly one connection, and is closed right
//! after that accept.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn, Instrument};

use super::bridge::{wait_for_close, BridgeSession, SessionCore};
use super::types::{Direction, PeerId, SessionListener, SessionState};
use crate::config::BridgeConfig;
use crate::error::{SessionError, SocketStage};
use crate::transport::{boxed, BoxedTransport, TransportStream};

/// An outgoing session whose loopback listener is bound but not yet started
pub struct OutgoingBridgeSession {
    core: SessionCore,
    transport: BoxedTransport,
    listener: TcpListener,
    local_addr: SocketAddr,
    accept_timeout: Option<Duration>,
}

impl OutgoingBridgeSession {
    /// Take ownership of `transport` and bind an ephemeral loopback listener
    ///
    /// # Errors
    ///
    /// Returns `SessionError::SocketConstruction` if the listener cannot be
    /// bound. The transport socket is dropped (closed) in that case.
    pub async fn bind(
        transport: impl TransportStream,
        peer_id: PeerId,
        config: &BridgeConfig,
        listener: Arc<dyn SessionListener>,
    ) -> Result<Self, SessionError> {
        Self::bind_on_port(transport, peer_id, config, 0, listener).await
    }

    /// Same as [`bind`](Self::bind), listening on `port` (0 = OS-assigned)
    ///
    /// # Errors
    ///
    /// Returns `SessionError::SocketConstruction` if the listener cannot be
    /// bound.
    pub async fn bind_on_port(
        transport: impl TransportStream,
        peer_id: PeerId,
        config: &BridgeConfig,
        port: u16,
        listener: Arc<dyn SessionListener>,
    ) -> Result<Self, SessionError> {
        let addr = SocketAddr::new(config.bind_address, port);
        let tcp_listener = TcpListener::bind(addr)
            .await
            .map_err(|e| SessionError::construction(SocketStage::Bind, format!("{addr}: {e}")))?;
        let local_addr = tcp_listener
            .local_addr()
            .map_err(|e| SessionError::construction(SocketStage::Bind, e.to_string()))?;

        let core = SessionCore::new(peer_id, Direction::Outgoing, listener, config.chunk_size);
        debug!("Session {} bound loopback listener on {}", core.info(), local_addr);

        Ok(Self {
            core,
            transport: boxed(transport),
            listener: tcp_listener,
            local_addr,
            accept_timeout: config.accept_timeout(),
        })
    }

    /// The bound port the application should connect to
    #[must_use]
    pub fn listening_port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Handle to this session, valid before and after [`start`](Self::start)
    #[must_use]
    pub fn handle(&self) -> BridgeSession {
        self.core.handle()
    }

    /// Report the listening port and start waiting for the application
    ///
    /// Returns as soon as `on_listening` has been delivered; accepting and
    /// bridging continue on a background task.
    pub fn start(self) -> BridgeSession {
        let handle = self.core.handle();
        let Self {
            core,
            transport,
            listener,
            local_addr,
            accept_timeout,
        } = self;

        core.listener.on_listening(core.info(), local_addr.port());
        info!(
            "Session {} listening for the application on {}",
            core.info(),
            local_addr
        );

        let span = tracing::info_span!(
            "bridge_session",
            id = %core.info().id,
            peer = %core.info().peer_id,
            direction = "outgoing",
        );

        tokio::spawn(
            async move {
                let mut shutdown_rx = core.shared.subscribe_shutdown();

                let accepted = tokio::select! {
                    result = accept_one(listener, accept_timeout) => Some(result),
                    () = wait_for_close(&mut shutdown_rx) => None,
                };

                let error = match accepted {
                    Some(Ok((local, peer_addr))) => {
                        debug!("Application connected from {}", peer_addr);
                        core.shared.set_state(SessionState::StreamsEstablished);
                        core.bridge(transport, local, &mut shutdown_rx).await
                    }
                    Some(Err(e)) => {
                        warn!("Session {} never bridged: {}", core.info(), e);
                        drop(transport);
                        Some(e.to_string())
                    }
                    None => {
                        drop(transport);
                        None
                    }
                };

                core.finish(error);
            }
            .instrument(span),
        );

        handle
    }
}

/// Accept exactly one connection, then drop the listener
async fn accept_one(
    listener: TcpListener,
    accept_timeout: Option<Duration>,
) -> Result<(TcpStream, SocketAddr), SessionError> {
    let accept = listener.accept();
    let result = match accept_timeout {
        Some(limit) => tokio::time::timeout(limit, accept).await.map_err(|_| {
            SessionError::construction(
                SocketStage::Accept,
                format!("no connection within {}ms", limit.as_millis()),
            )
        })?,
        None => accept.await,
    };
    result.map_err(|e| SessionError::construction(SocketStage::Accept, e.to_string()))
}
