//! Sequencer timing on a paused clock

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use peer_bridge::config::Config;
use peer_bridge::connection::BridgeContext;
use peer_bridge::error::OperationError;
use peer_bridge::sequencer::{
    MockDiscovery, OperationKind, OperationSequencer, SequencerState, SubsystemState,
};

const WATCHDOG: Duration = Duration::from_millis(3000);

type Outcomes = mpsc::UnboundedReceiver<Result<(), OperationError>>;

fn channel() -> (
    mpsc::UnboundedSender<Result<(), OperationError>>,
    Outcomes,
) {
    mpsc::unbounded_channel()
}

const DISCOVERING: SubsystemState = SubsystemState {
    is_discovering: true,
    is_advertising: false,
};

#[tokio::test(start_paused = true)]
async fn test_timeout_after_configured_duration() {
    let mock = Arc::new(MockDiscovery::never_converging());
    let seq = OperationSequencer::new(mock.clone(), WATCHDOG);
    let (tx, mut outcomes) = channel();

    let started = Instant::now();
    seq.execute_start(true, move |o| {
        let _ = tx.send(o);
    });

    // Just before the deadline nothing has happened
    tokio::time::sleep(WATCHDOG - Duration::from_millis(1)).await;
    assert!(outcomes.try_recv().is_err());
    assert_eq!(seq.state(), SequencerState::Pending(OperationKind::Start));

    let outcome = outcomes.recv().await.unwrap();
    let waited = started.elapsed();
    assert!(waited >= WATCHDOG && waited < WATCHDOG + Duration::from_millis(10));
    assert!(matches!(
        outcome,
        Err(OperationError::Timeout {
            kind: OperationKind::Start,
            ..
        })
    ));
    assert_eq!(seq.state(), SequencerState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_late_state_change_after_timeout_is_ignored() {
    let mock = Arc::new(MockDiscovery::never_converging());
    let seq = OperationSequencer::new(mock.clone(), WATCHDOG);
    let (tx, mut outcomes) = channel();

    seq.execute_start(false, move |o| {
        let _ = tx.send(o);
    });
    assert!(outcomes.recv().await.unwrap().unwrap_err().is_timeout());

    // The subsystem converges after all; nobody is waiting any more
    mock.set_state(DISCOVERING);
    seq.check_current_operation_status();
    assert!(outcomes.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_state_change_at_deadline_resolves_once() {
    let mock = Arc::new(MockDiscovery::never_converging());
    let seq = OperationSequencer::new(mock.clone(), WATCHDOG);
    let (tx, mut outcomes) = channel();

    seq.execute_start(false, move |o| {
        let _ = tx.send(o);
    });

    // Converge exactly when the watchdog is due; one of the two wins
    tokio::time::sleep(WATCHDOG).await;
    mock.set_state(DISCOVERING);
    seq.check_current_operation_status();

    assert!(outcomes.recv().await.is_some());
    assert!(outcomes.recv().await.is_none());
    assert!(seq.is_idle());
}

#[tokio::test(start_paused = true)]
async fn test_busy_does_not_restart_watchdog() {
    let mock = Arc::new(MockDiscovery::never_converging());
    let seq = OperationSequencer::new(mock.clone(), WATCHDOG);
    let (tx_first, mut first) = channel();
    let (tx_second, mut second) = channel();

    let started = Instant::now();
    seq.execute_start(false, move |o| {
        let _ = tx_first.send(o);
    });

    tokio::time::sleep(Duration::from_millis(2000)).await;
    seq.execute_start(false, move |o| {
        let _ = tx_second.send(o);
    });
    assert!(matches!(
        second.recv().await,
        Some(Err(OperationError::Busy { .. }))
    ));

    // The first watchdog still fires at its own deadline
    assert!(first.recv().await.unwrap().unwrap_err().is_timeout());
    assert!(started.elapsed() < WATCHDOG + Duration::from_millis(10));
}

#[tokio::test(start_paused = true)]
async fn test_context_forwards_state_changes() {
    let mock = Arc::new(MockDiscovery::never_converging());
    let ctx = BridgeContext::new(&Config::default(), mock.clone(), None);
    let (tx, mut outcomes) = channel();

    ctx.start(8080, false, move |o| {
        let _ = tx.send(o);
    })
    .unwrap();
    assert_eq!(ctx.server_port(), 8080);
    assert!(!ctx.sequencer().is_idle());

    tokio::time::sleep(Duration::from_millis(500)).await;
    mock.set_state(DISCOVERING);
    ctx.on_subsystem_state_changed();
    assert_eq!(outcomes.recv().await, Some(Ok(())));

    // Dispose drops a pending operation without answering it
    let (tx, mut outcomes) = channel();
    ctx.stop(true, move |o| {
        let _ = tx.send(o);
    });
    ctx.dispose();
    tokio::time::sleep(WATCHDOG * 2).await;
    assert!(outcomes.recv().await.is_none());
}
