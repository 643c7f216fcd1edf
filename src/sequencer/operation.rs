//! Start/stop operations and the pending-operation slot contents

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::subsystem::SubsystemState;
use crate::error::OperationError;

/// Callback receiving the outcome of a start/stop operation
pub type OperationCallback = Box<dyn FnOnce(Result<(), OperationError>) + Send>;

/// Kind of a start/stop operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Start discovery (and optionally advertising)
    Start,
    /// Stop discovery (and optionally advertising)
    Stop,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Stop => write!(f, "stop"),
        }
    }
}

/// A start or stop request with its parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationRequest {
    /// Start discovery; also advertise when `advertise` is set
    Start { advertise: bool },
    /// Stop discovery only, or everything
    Stop { stop_only_listening: bool },
}

impl OperationRequest {
    /// Operation kind
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::Start { .. } => OperationKind::Start,
            Self::Stop { .. } => OperationKind::Stop,
        }
    }

    /// Check whether `state` is the target state of this request
    ///
    /// A start wants discovery running, and advertising too if requested.
    /// A listening-only stop wants discovery stopped; a full stop wants
    /// both discovery and advertising stopped.
    #[must_use]
    pub const fn is_satisfied_by(&self, state: &SubsystemState) -> bool {
        match *self {
            Self::Start { advertise } => {
                state.is_discovering && (!advertise || state.is_advertising)
            }
            Self::Stop {
                stop_only_listening: true,
            } => !state.is_discovering,
            Self::Stop {
                stop_only_listening: false,
            } => !state.is_discovering && !state.is_advertising,
        }
    }
}

impl fmt::Display for OperationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start { advertise } => write!(f, "start(advertise={advertise})"),
            Self::Stop {
                stop_only_listening,
            } => write!(f, "stop(only_listening={stop_only_listening})"),
        }
    }
}

/// The single in-flight operation
///
/// The watchdog handle lives next to the callback, so the slot and its
/// timer are always set and cleared together.
pub(crate) struct PendingOperation {
    pub(crate) id: u64,
    pub(crate) request: OperationRequest,
    pub(crate) callback: OperationCallback,
    pub(crate) submitted_at: Instant,
    pub(crate) watchdog: JoinHandle<()>,
}

impl PendingOperation {
    /// Resolve with `outcome`, disarming the watchdog
    pub(crate) fn complete(self, outcome: Result<(), OperationError>) {
        self.watchdog.abort();
        (self.callback)(outcome);
    }

    /// Drop without invoking the callback
    pub(crate) fn cancel(self) {
        self.watchdog.abort();
    }
}

impl fmt::Debug for PendingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOperation")
            .field("id", &self.id)
            .field("request", &self.request)
            .field("elapsed", &self.submitted_at.elapsed())
            .finish()
    }
}
