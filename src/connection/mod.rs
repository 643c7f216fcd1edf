//! Connection handling module
//!
//! This module provides connection management, including:
//! - The registry of live sessions with uniqueness and capacity rules
//! - Session statistics
//! - [`BridgeContext`], the entry point tying sessions, registry, and the
//!   operation sequencer together

mod context;
mod registry;
mod stats;

pub use context::{BridgeContext, ConnectCallback, TransferObserver};
pub use registry::ConnectionRegistry;
pub use stats::{ConnectionStats, StatsSnapshot};
