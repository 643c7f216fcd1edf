//! Registry invariants under parallel callers
//!
//! These run on the multi-threaded runtime so adds and removes genuinely
//! interleave across worker threads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use peer_bridge::connection::ConnectionRegistry;
use peer_bridge::session::{Direction, PeerId};

use super::idle_handle;

/// Number of concurrent tasks for parallel tests
const CONCURRENT_TASK_COUNT: usize = 32;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_add_outgoing_same_peer() {
    let registry = Arc::new(ConnectionRegistry::new(100));
    let mut handles = Vec::with_capacity(CONCURRENT_TASK_COUNT);
    for _ in 0..CONCURRENT_TASK_COUNT {
        handles.push(idle_handle("AA:BB").await);
    }

    let barrier = Arc::new(tokio::sync::Barrier::new(CONCURRENT_TASK_COUNT));
    let successes = Arc::new(AtomicUsize::new(0));
    let tasks: Vec<_> = handles
        .into_iter()
        .map(|session| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            let successes = Arc::clone(&successes);
            tokio::spawn(async move {
                barrier.wait().await;
                if registry.add_outgoing(session) {
                    successes.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(successes.load(Ordering::SeqCst), 1);
    assert_eq!(registry.count(Direction::Outgoing), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_capacity_never_exceeded_under_contention() {
    let capacity = 10;
    let registry = Arc::new(ConnectionRegistry::new(capacity));
    let mut handles = Vec::with_capacity(CONCURRENT_TASK_COUNT);
    for i in 0..CONCURRENT_TASK_COUNT {
        handles.push(idle_handle(&format!("peer-{i}")).await);
    }

    let tasks: Vec<_> = handles
        .into_iter()
        .enumerate()
        .map(|(i, session)| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                if i % 2 == 0 {
                    registry.add_outgoing(session)
                } else {
                    registry.add_incoming(session)
                }
            })
        })
        .collect();

    let mut accepted = 0;
    for task in tasks {
        if task.await.unwrap() {
            accepted += 1;
        }
    }

    assert_eq!(accepted, capacity);
    assert_eq!(registry.total(), capacity);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sweep_with_concurrent_self_removal() {
    let registry = Arc::new(ConnectionRegistry::new(1000));
    let mut sessions = Vec::new();
    for i in 0..CONCURRENT_TASK_COUNT {
        let session = idle_handle(&format!("peer-{i}")).await;
        assert!(registry.add_outgoing(session.clone()));
        sessions.push(session);
    }

    // Half the sessions try to remove themselves while the sweep runs
    let removers: Vec<_> = sessions
        .iter()
        .step_by(2)
        .map(|session| {
            let registry = Arc::clone(&registry);
            let peer = session.peer_id().clone();
            let id = session.id();
            tokio::spawn(async move { registry.remove_outgoing_session(&peer, id) })
        })
        .collect();
    let swept = registry.close_and_remove_all(Direction::Outgoing);

    let mut self_removed = 0;
    for remover in removers {
        if remover.await.unwrap() {
            self_removed += 1;
        }
    }

    // Every session left the registry exactly once
    assert_eq!(swept + self_removed, CONCURRENT_TASK_COUNT);
    assert_eq!(registry.count(Direction::Outgoing), 0);

    // Swept sessions were closed by the sweep; closing again is a no-op
    let already_closed = sessions.iter().filter(|s| !s.close()).count();
    assert_eq!(already_closed, swept);
}

#[tokio::test]
async fn test_add_remove_add_cycle() {
    let registry = ConnectionRegistry::new(30);
    let peer = PeerId::from("AA:BB");

    assert!(registry.add_outgoing(idle_handle("AA:BB").await));
    assert!(!registry.add_outgoing(idle_handle("AA:BB").await));
    assert!(registry.remove_outgoing(&peer));
    assert!(registry.add_outgoing(idle_handle("AA:BB").await));
    assert!(registry.has_connection(&peer));
}
