//! Operation sequencer
//!
//! Serializes start/stop requests against a [`DiscoverySubsystem`] that
//! converges asynchronously. At most one operation is pending. It is
//! resolved by whichever comes first: a status check observing the target
//! state, or the watchdog firing. Both paths take the operation out of the
//! slot under the same lock, so the loser finds the slot empty (or holding
//! a newer operation with a different ID) and does nothing.
//!
//! Callbacks always run after the lock is released.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::operation::{OperationCallback, OperationKind, OperationRequest, PendingOperation};
use super::subsystem::DiscoverySubsystem;
use crate::error::OperationError;

/// Observable sequencer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    /// No operation in flight
    Idle,
    /// An operation of this kind is waiting for convergence
    Pending(OperationKind),
}

struct Inner {
    subsystem: Arc<dyn DiscoverySubsystem>,
    timeout: Duration,
    pending: Mutex<Option<PendingOperation>>,
    next_id: AtomicU64,
}

impl Inner {
    /// Take the pending operation if it is still operation `id`
    fn take_if(&self, id: u64) -> Option<PendingOperation> {
        let mut slot = self.pending.lock();
        match slot.as_ref() {
            Some(op) if op.id == id => slot.take(),
            _ => None,
        }
    }
}

/// Start/stop operation sequencer
///
/// Cheap to clone; clones share the pending slot.
#[derive(Clone)]
pub struct OperationSequencer {
    inner: Arc<Inner>,
}

impl OperationSequencer {
    /// Create a sequencer with the given watchdog duration
    pub fn new(subsystem: Arc<dyn DiscoverySubsystem>, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                subsystem,
                timeout,
                pending: Mutex::new(None),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Request discovery start
    ///
    /// `callback` receives `Ok(())` once the subsystem is discovering (and
    /// advertising, if requested), `Err(Timeout)` if that is not observed
    /// within the watchdog duration, `Err(Failed)` if the subsystem refuses
    /// the request, or `Err(Busy)` right away if another operation is
    /// pending.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn execute_start<F>(&self, advertise: bool, callback: F)
    where
        F: FnOnce(Result<(), OperationError>) + Send + 'static,
    {
        self.execute(OperationRequest::Start { advertise }, Box::new(callback));
    }

    /// Request discovery stop
    ///
    /// Same outcome rules as [`execute_start`](Self::execute_start).
    pub fn execute_stop<F>(&self, stop_only_listening: bool, callback: F)
    where
        F: FnOnce(Result<(), OperationError>) + Send + 'static,
    {
        self.execute(
            OperationRequest::Stop {
                stop_only_listening,
            },
            Box::new(callback),
        );
    }

    fn execute(&self, request: OperationRequest, callback: OperationCallback) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        {
            let mut slot = self.inner.pending.lock();
            if let Some(current) = slot.as_ref() {
                let busy = OperationError::Busy {
                    requested: request.kind(),
                    pending: current.request.kind(),
                };
                drop(slot);
                warn!("Rejecting {}: {}", request, busy);
                callback(Err(busy));
                return;
            }

            *slot = Some(PendingOperation {
                id,
                request,
                callback,
                submitted_at: Instant::now(),
                watchdog: self.spawn_watchdog(id),
            });
        }

        debug!("Executing {} (operation {})", request, id);

        // The subsystem may report state synchronously from inside these
        // calls, which re-enters check_current_operation_status
        let issued = match request {
            OperationRequest::Start { advertise } => self.inner.subsystem.start(advertise),
            OperationRequest::Stop {
                stop_only_listening,
            } => self.inner.subsystem.stop(stop_only_listening),
        };

        if let Err(reason) = issued {
            if let Some(op) = self.inner.take_if(id) {
                warn!("{} refused by the subsystem: {}", request, reason);
                op.complete(Err(OperationError::Failed(reason)));
            }
            return;
        }

        self.check_current_operation_status();
    }

    fn spawn_watchdog(&self, id: u64) -> tokio::task::JoinHandle<()> {
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let timeout = self.inner.timeout;

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;

            let Some(inner) = inner.upgrade() else {
                return;
            };
            let Some(op) = inner.take_if(id) else {
                return;
            };

            let elapsed_ms = op.submitted_at.elapsed().as_millis() as u64;
            let error = OperationError::Timeout {
                kind: op.request.kind(),
                elapsed_ms,
            };
            warn!("{}; subsystem state is {:?}", error, inner.subsystem.state());
            // Running inside the watchdog itself: call the callback directly
            // rather than through complete(), which would abort this task
            (op.callback)(Err(error));
        })
    }

    /// Resolve the pending operation if the subsystem reached its target
    ///
    /// Called by the subsystem's owner on every state change. No-op when
    /// idle or when the target is not reached yet.
    pub fn check_current_operation_status(&self) {
        let Some((id, request)) = self
            .inner
            .pending
            .lock()
            .as_ref()
            .map(|op| (op.id, op.request))
        else {
            return;
        };

        // Read after the operation was observed, so the snapshot is never
        // older than the request it is compared against
        let state = self.inner.subsystem.state();
        if !request.is_satisfied_by(&state) {
            return;
        }

        let resolved = self.inner.take_if(id);

        if let Some(op) = resolved {
            info!(
                "{} completed in {:?} (operation {})",
                op.request,
                op.submitted_at.elapsed(),
                op.id
            );
            op.complete(Ok(()));
        }
    }

    /// Drop the pending operation without invoking its callback
    ///
    /// Returns whether an operation was pending. Only meant for shutdown.
    pub fn cancel_current_operation(&self) -> bool {
        let cancelled = self.inner.pending.lock().take();
        match cancelled {
            Some(op) => {
                debug!("Cancelling {} (operation {})", op.request, op.id);
                op.cancel();
                true
            }
            None => false,
        }
    }

    /// Current sequencer state
    #[must_use]
    pub fn state(&self) -> SequencerState {
        match self.inner.pending.lock().as_ref() {
            Some(op) => SequencerState::Pending(op.request.kind()),
            None => SequencerState::Idle,
        }
    }

    /// Check if no operation is pending
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.inner.pending.lock().is_none()
    }

    /// Kind of the pending operation, if any
    #[must_use]
    pub fn pending_kind(&self) -> Option<OperationKind> {
        self.inner
            .pending
            .lock()
            .as_ref()
            .map(|op| op.request.kind())
    }

    /// Watchdog duration
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// The subsystem this sequencer drives
    #[must_use]
    pub fn subsystem(&self) -> &Arc<dyn DiscoverySubsystem> {
        &self.inner.subsystem
    }
}

impl std::fmt::Debug for OperationSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationSequencer")
            .field("timeout", &self.inner.timeout)
            .field("pending", &*self.inner.pending.lock())
            .finish()
    }
}
