//! Discovery subsystem boundary

use serde::{Deserialize, Serialize};

/// Observable state of the discovery/advertising subsystem
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsystemState {
    /// Scanning for peers
    pub is_discovering: bool,
    /// Advertising our presence
    pub is_advertising: bool,
}

impl SubsystemState {
    /// Fully stopped
    pub const STOPPED: Self = Self {
        is_discovering: false,
        is_advertising: false,
    };

    /// Check if anything is running
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.is_discovering || self.is_advertising
    }
}

/// The stateful subsystem the operation sequencer drives
///
/// Requests are fire-and-forget: returning `Ok` only means the request was
/// accepted. The subsystem reports convergence later by having its owner
/// call [`check_current_operation_status`], and may never converge at all.
///
/// [`check_current_operation_status`]: crate::sequencer::OperationSequencer::check_current_operation_status
pub trait DiscoverySubsystem: Send + Sync {
    /// Begin discovery, plus advertising when `advertise` is set
    ///
    /// # Errors
    ///
    /// Returns a description if the request is refused outright.
    fn start(&self, advertise: bool) -> Result<(), String>;

    /// Stop discovery only, or stop everything
    ///
    /// # Errors
    ///
    /// Returns a description if the request is refused outright.
    fn stop(&self, stop_only_listening: bool) -> Result<(), String>;

    /// Current state
    fn state(&self) -> SubsystemState;
}
