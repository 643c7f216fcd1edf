//! Incoming bridge session
//!
//! The remote peer connected to us; the bridge dials the local
//! application on its pre-configured loopback port. The dial is attempted
//! once: a failure is a construction error for the owner to handle.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;
use tracing::{debug, info, Instrument};

use super::bridge::{BridgeSession, SessionCore};
use super::types::{Direction, PeerId, SessionListener, SessionState};
use crate::config::BridgeConfig;
use crate::error::{SessionError, SocketStage};
use crate::transport::{boxed, BoxedTransport, TransportStream};

/// An incoming session whose loopback leg is connected but not yet started
pub struct IncomingBridgeSession {
    core: SessionCore,
    transport: BoxedTransport,
    local: TcpStream,
    server_addr: SocketAddr,
    local_addr: SocketAddr,
}

impl IncomingBridgeSession {
    /// Take ownership of `transport` and dial `config.server_port` on loopback
    ///
    /// # Errors
    ///
    /// Returns `SessionError::SocketConstruction` if no server port is
    /// configured or the dial fails. The transport socket is dropped
    /// (closed) in that case.
    pub async fn connect(
        transport: impl TransportStream,
        peer_id: PeerId,
        config: &BridgeConfig,
        listener: Arc<dyn SessionListener>,
    ) -> Result<Self, SessionError> {
        if config.server_port == 0 {
            return Err(SessionError::construction(
                SocketStage::Connect,
                "no server port configured",
            ));
        }

        let server_addr = config.server_addr();
        let local = TcpStream::connect(server_addr).await.map_err(|e| {
            SessionError::construction(SocketStage::Connect, format!("{server_addr}: {e}"))
        })?;
        let local_addr = local
            .local_addr()
            .map_err(|e| SessionError::construction(SocketStage::Connect, e.to_string()))?;
        // Loopback; latency matters more than segment count
        let _ = local.set_nodelay(true);

        let core = SessionCore::new(peer_id, Direction::Incoming, listener, config.chunk_size);
        core.shared.set_state(SessionState::StreamsEstablished);
        debug!(
            "Session {} connected {} -> {}",
            core.info(),
            local_addr,
            server_addr
        );

        Ok(Self {
            core,
            transport: boxed(transport),
            local,
            server_addr,
            local_addr,
        })
    }

    /// The application port this session dialed
    #[must_use]
    pub fn server_port(&self) -> u16 {
        self.server_addr.port()
    }

    /// Our ephemeral port on the loopback connection
    #[must_use]
    pub fn local_port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Handle to this session, valid before and after [`start`](Self::start)
    #[must_use]
    pub fn handle(&self) -> BridgeSession {
        self.core.handle()
    }

    /// Start bridging on a background task
    pub fn start(self) -> BridgeSession {
        let handle = self.core.handle();
        let Self {
            core,
            transport,
            local,
            server_addr,
            ..
        } = self;

        info!("Session {} bridging to {}", core.info(), server_addr);

        let span = tracing::info_span!(
            "bridge_session",
            id = %core.info().id,
            peer = %core.info().peer_id,
            direction = "incoming",
        );

        tokio::spawn(
            async move {
                let mut shutdown_rx = core.shared.subscribe_shutdown();
                let error = core.bridge(transport, local, &mut shutdown_rx).await;
                core.finish(error);
            }
            .instrument(span),
        );

        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::SessionInfo;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    struct ChannelListener(mpsc::UnboundedSender<Option<String>>);

    impl SessionListener for ChannelListener {
        fn on_disconnected(&self, _session: &SessionInfo, error: Option<&str>) {
            let _ = self.0.send(error.map(str::to_owned));
        }
    }

    fn config_for(port: u16) -> BridgeConfig {
        BridgeConfig {
            server_port: port,
            ..BridgeConfig::default()
        }
    }

    #[tokio::test]
    async fn test_dials_server_port_and_bridges() {
        let app = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = app.local_addr().unwrap().port();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (transport, mut peer) = duplex(1024);

        let session = IncomingBridgeSession::connect(
            transport,
            PeerId::from("CC:DD"),
            &config_for(port),
            Arc::new(ChannelListener(tx)),
        )
        .await
        .unwrap();
        assert_eq!(session.server_port(), port);
        assert_ne!(session.local_port(), 0);
        assert_eq!(session.handle().state(), SessionState::StreamsEstablished);

        let (mut app_conn, _) = app.accept().await.unwrap();
        let handle = session.start();

        peer.write_all(b"hello app").await.unwrap();
        let mut buf = [0u8; 9];
        app_conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello app");

        app_conn.write_all(b"hi peer").await.unwrap();
        let mut buf = [0u8; 7];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi peer");

        drop(app_conn);
        let reason = rx.recv().await.unwrap();
        assert!(reason.unwrap().contains("Local"));
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_dial_failure_is_construction_error() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
            probe.local_addr().unwrap().port()
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        let (transport, _peer) = duplex(64);

        let result = IncomingBridgeSession::connect(
            transport,
            PeerId::from("CC:DD"),
            &config_for(port),
            Arc::new(ChannelListener(tx)),
        )
        .await;

        assert!(matches!(
            result,
            Err(SessionError::SocketConstruction {
                stage: SocketStage::Connect,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_unconfigured_server_port() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (transport, _peer) = duplex(64);

        let result = IncomingBridgeSession::connect(
            transport,
            PeerId::from("CC:DD"),
            &BridgeConfig::default(),
            Arc::new(ChannelListener(tx)),
        )
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_close_reports_once() {
        let app = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = app.local_addr().unwrap().port();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (transport, _peer) = duplex(64);

        let session = IncomingBridgeSession::connect(
            transport,
            PeerId::from("CC:DD"),
            &config_for(port),
            Arc::new(ChannelListener(tx)),
        )
        .await
        .unwrap();
        let (_app_conn, _) = app.accept().await.unwrap();
        let handle = session.start();

        let closers: Vec<_> = (0..8)
            .map(|_| {
                let h = handle.clone();
                tokio::spawn(async move { h.close() })
            })
            .collect();
        let mut initiated = 0;
        for closer in closers {
            if closer.await.unwrap() {
                initiated += 1;
            }
        }
        assert_eq!(initiated, 1);

        assert_eq!(rx.recv().await, Some(None));
        // The listener is dropped with the session's tasks; nothing else arrives
        assert_eq!(rx.recv().await, None);
    }
}
