//! Start/stop operation sequencing
//!
//! This module provides:
//! - The [`DiscoverySubsystem`] boundary the sequencer drives
//! - [`OperationSequencer`]: one pending operation at a time, resolved by
//!   a state check or a fixed-duration watchdog
//! - [`MockDiscovery`]: an in-memory subsystem for the daemon and tests

mod mock;
mod operation;
mod runner;
mod subsystem;

pub use mock::MockDiscovery;
pub use operation::{OperationCallback, OperationKind, OperationRequest};
pub use runner::{OperationSequencer, SequencerState};
pub use subsystem::{DiscoverySubsystem, SubsystemState};
