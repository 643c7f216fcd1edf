//! Transport socket boundary
//!
//! The bridge never creates transport sockets itself. A collaborator
//! (the native connector plus its handshake) hands over a live,
//! authenticated byte stream, and the bridge takes exclusive ownership
//! of it. Anything that is `AsyncRead + AsyncWrite + Send + Unpin` can
//! play that role: an RFCOMM socket wrapper, a `tokio::io::duplex` half
//! in tests, or a TCP stream from the stand-in transport.
//!
//! # TCP stand-in
//!
//! [`TcpTransportListener`] accepts plain TCP connections and presents
//! each one as an incoming transport socket. It lets the daemon run on
//! machines without the native radio stack.

mod tcp;

use tokio::io::{AsyncRead, AsyncWrite};

pub use tcp::{run_accept_loop, TcpTransportListener};

/// A byte-stream socket over the native peer-to-peer transport
pub trait TransportStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> TransportStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Owned, type-erased transport socket
pub type BoxedTransport = Box<dyn TransportStream>;

/// Erase the concrete transport type
pub fn boxed(stream: impl TransportStream) -> BoxedTransport {
    Box::new(stream)
}
