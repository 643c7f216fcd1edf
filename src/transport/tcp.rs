//! TCP stand-in transport
//!
//! Accepts plain TCP connections and hands each one to a
//! [`BridgeContext`] as an incoming transport socket. The remote socket
//! address serves as the peer ID.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use peer_bridge::config::Config;
//! use peer_bridge::connection::BridgeContext;
//! use peer_bridge::sequencer::MockDiscovery;
//! use peer_bridge::transport::{run_accept_loop, TcpTransportListener};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ctx = Arc::new(BridgeContext::new(
//!     &Config::default(),
//!     Arc::new(MockDiscovery::immediate()),
//!     None,
//! ));
//! let listener = TcpTransportListener::bind("127.0.0.1:48620".parse()?).await?;
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
//! run_accept_loop(listener, ctx, shutdown_rx).await?;
//! # Ok(())
//! # }
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::connection::BridgeContext;
use crate::session::PeerId;

/// Listener presenting TCP connections as incoming transport sockets
#[derive(Debug)]
pub struct TcpTransportListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpTransportListener {
    /// Bind the stand-in transport
    ///
    /// # Errors
    ///
    /// Returns the bind error.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("TCP transport listening on {}", local_addr);
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Bound address
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept one transport connection
    ///
    /// # Errors
    ///
    /// Returns the accept error.
    pub async fn accept(&self) -> io::Result<(TcpStream, PeerId)> {
        let (stream, remote) = self.listener.accept().await?;
        let _ = stream.set_nodelay(true);
        Ok((stream, PeerId::new(remote.to_string())))
    }
}

/// Errors the accept loop can continue past
fn is_recoverable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

/// Feed accepted connections to `ctx` until shutdown
///
/// Each connection is handed over on its own task so a slow dial to the
/// application never stalls the accept loop.
///
/// # Errors
///
/// Returns a non-recoverable accept error.
pub async fn run_accept_loop(
    listener: TcpTransportListener,
    ctx: Arc<BridgeContext>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> io::Result<()> {
    info!("Starting transport accept loop on {}", listener.local_addr());

    loop {
        let accepted = tokio::select! {
            result = listener.accept() => result,
            _ = shutdown_rx.recv() => {
                info!("Transport accept loop stopping due to shutdown");
                break;
            }
        };

        match accepted {
            Ok((stream, peer_id)) => {
                if ctx.is_disposed() {
                    break;
                }
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    if let Err(e) = ctx.on_transport_socket_ready(stream, peer_id, true).await {
                        debug!("Failed to bridge transport connection: {}", e);
                    }
                });
            }
            Err(e) if is_recoverable(&e) => {
                debug!("Recoverable accept error: {}", e);
            }
            Err(e) => {
                warn!("Transport accept failed: {}", e);
                return Err(e);
            }
        }
    }

    Ok(())
}
