//! End-to-end bridge sessions
//!
//! The transport side is a `tokio::io::duplex` pair standing in for a
//! native socket; the local side is real loopback TCP.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{duplex, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use peer_bridge::config::{BridgeConfig, Config};
use peer_bridge::connection::BridgeContext;
use peer_bridge::error::BridgeError;
use peer_bridge::sequencer::MockDiscovery;
use peer_bridge::session::{
    Direction, IncomingBridgeSession, OutgoingBridgeSession, PeerId, SessionState,
};

use super::{Event, RecordingListener};

/// Deterministic non-repeating payload
fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Transport whose reads come from a pipe and whose writes always fail
struct BrokenWriteTransport {
    reads: DuplexStream,
}

impl AsyncRead for BrokenWriteTransport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().reads).poll_read(cx, buf)
    }
}

impl AsyncWrite for BrokenWriteTransport {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "transport link lost",
        )))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("listener dropped")
}

#[tokio::test]
async fn test_outgoing_ping_scenario() {
    let (listener, mut events) = RecordingListener::new();
    let (transport, mut remote) = duplex(4096);

    let session = OutgoingBridgeSession::bind(
        transport,
        PeerId::from("AA:BB"),
        &BridgeConfig::default(),
        listener,
    )
    .await
    .unwrap();
    let handle = session.start();

    let Event::Listening(port) = next_event(&mut events).await else {
        panic!("expected listening event first");
    };
    assert_ne!(port, 0);

    let mut app = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    app.write_all(b"PING").await.unwrap();

    let mut buf = [0u8; 4];
    remote.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"PING");

    drop(remote);
    match next_event(&mut events).await {
        Event::Disconnected(peer, Some(_)) => assert_eq!(peer.as_str(), "AA:BB"),
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(handle.state(), SessionState::Closed);

    // Exactly one disconnect
    assert!(tokio::time::timeout(Duration::from_millis(100), events.recv())
        .await
        .map_or(true, |e| e.is_none()));
}

#[tokio::test]
async fn test_bridge_is_transparent_both_ways() {
    let app = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = BridgeConfig {
        server_port: app.local_addr().unwrap().port(),
        chunk_size: 1024,
        ..BridgeConfig::default()
    };
    let (listener, mut events) = RecordingListener::new();
    let (transport, remote) = duplex(8192);

    let session = IncomingBridgeSession::connect(transport, PeerId::from("CC:DD"), &config, listener.clone())
        .await
        .unwrap();
    let (app_conn, _) = app.accept().await.unwrap();
    let handle = session.start();

    let to_app = payload(256 * 1024);
    let to_remote: Vec<u8> = payload(100 * 1024).into_iter().rev().collect();

    let (mut remote_rd, mut remote_wr) = tokio::io::split(remote);
    let (mut app_rd, mut app_wr) = app_conn.into_split();

    let expected_at_app = to_app.clone();
    let expected_at_remote = to_remote.clone();

    let write_remote = tokio::spawn(async move { remote_wr.write_all(&to_app).await.unwrap() });
    let write_app = tokio::spawn(async move { app_wr.write_all(&to_remote).await.unwrap() });
    let read_app = tokio::spawn(async move {
        let mut got = vec![0u8; expected_at_app.len()];
        app_rd.read_exact(&mut got).await.unwrap();
        assert_eq!(got, expected_at_app);
    });
    let read_remote = tokio::spawn(async move {
        let mut got = vec![0u8; expected_at_remote.len()];
        remote_rd.read_exact(&mut got).await.unwrap();
        assert_eq!(got, expected_at_remote);
    });

    write_remote.await.unwrap();
    write_app.await.unwrap();
    read_app.await.unwrap();
    read_remote.await.unwrap();

    assert_eq!(handle.bytes_to_local(), 256 * 1024);
    assert_eq!(handle.bytes_to_transport(), 100 * 1024);
    assert_eq!(*listener.bytes.lock(), 356 * 1024);

    assert!(handle.close());
    match next_event(&mut events).await {
        Event::Disconnected(_, None) => {}
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_racing_closes_report_once() {
    for _ in 0..20 {
        let (listener, mut events) = RecordingListener::new();
        let (transport, remote) = duplex(64);

        let session = OutgoingBridgeSession::bind(
            transport,
            PeerId::from("AA:BB"),
            &BridgeConfig::default(),
            listener,
        )
        .await
        .unwrap();
        let port = session.listening_port();
        let handle = session.start();
        let _app = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

        // Owner close races the remote side going away
        let closer = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.close() })
        };
        drop(remote);
        let _ = closer.await.unwrap();
        handle.close();

        let mut disconnects = 0;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(200), events.recv()).await
        {
            if matches!(event, Event::Disconnected(..)) {
                disconnects += 1;
            }
        }
        assert_eq!(disconnects, 1);
        assert!(handle.is_closed());
    }
}

#[tokio::test]
async fn test_context_round_trip_and_cleanup() {
    let app = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = Config::default();
    config.bridge.server_port = app.local_addr().unwrap().port();
    let ctx = Arc::new(BridgeContext::new(
        &config,
        Arc::new(MockDiscovery::immediate()),
        None,
    ));

    // Outgoing: connect, hand over the socket, receive the port
    let (port_tx, mut port_rx) = mpsc::unbounded_channel();
    let peer = PeerId::from("AA:BB");
    ctx.connect(&peer, move |outcome| {
        let _ = port_tx.send(outcome);
    })
    .unwrap();

    let (transport, mut remote_out) = duplex(1024);
    ctx.on_transport_socket_ready(transport, peer.clone(), false)
        .await
        .unwrap();
    let port = port_rx.recv().await.unwrap().unwrap();
    let mut app_out = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

    // Incoming from the same peer is allowed alongside
    let (transport, mut remote_in) = duplex(1024);
    ctx.on_transport_socket_ready(transport, peer.clone(), true)
        .await
        .unwrap();
    let (mut app_in, _) = app.accept().await.unwrap();

    assert_eq!(ctx.registry().count(Direction::Outgoing), 1);
    assert_eq!(ctx.registry().count(Direction::Incoming), 1);

    app_out.write_all(b"out").await.unwrap();
    let mut buf = [0u8; 3];
    remote_out.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"out");

    remote_in.write_all(b"in!").await.unwrap();
    app_in.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"in!");

    // The outgoing session removes itself when the peer goes away
    drop(remote_out);
    tokio::time::timeout(Duration::from_secs(5), async {
        while ctx.registry().has_outgoing(&peer) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    // A new outgoing connection to the same peer is accepted again
    ctx.connect(&peer, |_| {}).unwrap();

    // Full stop closes outgoing sessions only; dispose closes the rest
    ctx.stop(false, |_| {});
    assert_eq!(ctx.registry().count(Direction::Incoming), 1);
    ctx.dispose();
    assert_eq!(ctx.registry().total(), 0);

    // The application sees its incoming leg close
    let mut rest = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), app_in.read_to_end(&mut rest))
        .await
        .unwrap();
    assert_eq!(read.unwrap(), 0);

    let (transport, _remote) = duplex(64);
    assert!(matches!(
        ctx.on_transport_socket_ready(transport, peer, true).await,
        Err(BridgeError::ShuttingDown)
    ));
}

#[tokio::test]
async fn test_transport_write_error_tears_down_session() {
    let (listener, mut events) = RecordingListener::new();
    let (reads, mut remote) = duplex(1024);

    let session = OutgoingBridgeSession::bind(
        BrokenWriteTransport { reads },
        PeerId::from("AA:BB"),
        &BridgeConfig::default(),
        listener,
    )
    .await
    .unwrap();
    let handle = session.start();
    let Event::Listening(port) = next_event(&mut events).await else {
        panic!("expected listening event first");
    };
    let mut app = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

    // The write towards the peer fails mid-bridge
    app.write_all(b"PING").await.unwrap();

    match next_event(&mut events).await {
        Event::Disconnected(peer, Some(reason)) => {
            assert_eq!(peer.as_str(), "AA:BB");
            assert!(reason.contains("copy failed"), "reason: {reason}");
            assert!(reason.contains("local->transport"), "reason: {reason}");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(handle.is_closed());

    // Both legs are closed
    let mut rest = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), app.read_to_end(&mut rest))
        .await
        .unwrap();
    assert_eq!(read.unwrap(), 0);
    let mut buf = [0u8; 1];
    assert_eq!(remote.read(&mut buf).await.unwrap(), 0);

    // Exactly one disconnect
    assert!(tokio::time::timeout(Duration::from_millis(100), events.recv())
        .await
        .map_or(true, |e| e.is_none()));
}

#[tokio::test]
async fn test_application_close_tears_down_session() {
    let (listener, mut events) = RecordingListener::new();
    let (transport, mut remote) = duplex(1024);

    let session = OutgoingBridgeSession::bind(
        transport,
        PeerId::from("CC:DD"),
        &BridgeConfig::default(),
        listener,
    )
    .await
    .unwrap();
    let port = session.listening_port();
    let handle = session.start();
    let _ = next_event(&mut events).await;

    let mut app = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    app.write_all(b"bye").await.unwrap();
    let mut buf = [0u8; 3];
    remote.read_exact(&mut buf).await.unwrap();
    drop(app);

    match next_event(&mut events).await {
        Event::Disconnected(_, Some(reason)) => assert_eq!(reason, "Local stream closed"),
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(handle.is_closed());

    // The peer sees the transport close
    let mut rest = [0u8; 1];
    assert_eq!(remote.read(&mut rest).await.unwrap(), 0);

    assert!(tokio::time::timeout(Duration::from_millis(100), events.recv())
        .await
        .map_or(true, |e| e.is_none()));
}
