//! Bridge session statistics
//!
//! Counters are updated from session callbacks and read by the daemon's
//! periodic report; all of them are relaxed atomics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::session::Leg;

/// Atomic session statistics
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Sessions registered and started
    total_accepted: AtomicU64,
    /// Sessions currently registered
    active: AtomicU64,
    /// Sessions closed by their owner
    completed: AtomicU64,
    /// Sessions that ended on a stream error or peer close
    errored: AtomicU64,
    /// Sessions refused (capacity, duplicate, construction failure)
    rejected: AtomicU64,
    /// Bytes copied transport -> local
    bytes_to_local: AtomicU64,
    /// Bytes copied local -> transport
    bytes_to_transport: AtomicU64,
}

impl ConnectionStats {
    /// Create new connection statistics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a session that was registered and started
    pub fn record_accepted(&self) {
        self.total_accepted.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session ending
    ///
    /// `clean` is true when the owner closed the session.
    pub fn record_finished(&self, clean: bool) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        if clean {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.errored.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a refused session
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one chunk written on `leg`
    pub fn record_bytes(&self, leg: Leg, bytes: usize) {
        let counter = match leg {
            Leg::TransportToLocal => &self.bytes_to_local,
            Leg::LocalToTransport => &self.bytes_to_transport,
        };
        counter.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Get total accepted sessions
    #[must_use]
    pub fn total_accepted(&self) -> u64 {
        self.total_accepted.load(Ordering::Relaxed)
    }

    /// Get currently active sessions
    #[must_use]
    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    /// Get cleanly closed sessions
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Get sessions that ended with an error
    #[must_use]
    pub fn errored(&self) -> u64 {
        self.errored.load(Ordering::Relaxed)
    }

    /// Get refused sessions
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Get bytes copied transport -> local
    #[must_use]
    pub fn bytes_to_local(&self) -> u64 {
        self.bytes_to_local.load(Ordering::Relaxed)
    }

    /// Get bytes copied local -> transport
    #[must_use]
    pub fn bytes_to_transport(&self) -> u64 {
        self.bytes_to_transport.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all statistics
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_accepted: self.total_accepted(),
            active: self.active(),
            completed: self.completed(),
            errored: self.errored(),
            rejected: self.rejected(),
            bytes_to_local: self.bytes_to_local(),
            bytes_to_transport: self.bytes_to_transport(),
            timestamp_ms: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        }
    }
}

/// Snapshot of session statistics at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Sessions registered and started
    pub total_accepted: u64,
    /// Sessions currently registered
    pub active: u64,
    /// Sessions closed by their owner
    pub completed: u64,
    /// Sessions that ended with an error
    pub errored: u64,
    /// Sessions refused
    pub rejected: u64,
    /// Bytes copied transport -> local
    pub bytes_to_local: u64,
    /// Bytes copied local -> transport
    pub bytes_to_transport: u64,
    /// Timestamp in milliseconds
    pub timestamp_ms: u64,
}

impl StatsSnapshot {
    /// Get total bytes transferred (both directions)
    #[must_use]
    pub const fn total_bytes(&self) -> u64 {
        self.bytes_to_local + self.bytes_to_transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_stats() {
        let stats = ConnectionStats::new();

        stats.record_accepted();
        stats.record_accepted();
        stats.record_accepted();
        assert_eq!(stats.total_accepted(), 3);
        assert_eq!(stats.active(), 3);

        stats.record_finished(true);
        assert_eq!(stats.active(), 2);
        assert_eq!(stats.completed(), 1);

        stats.record_finished(false);
        assert_eq!(stats.active(), 1);
        assert_eq!(stats.errored(), 1);

        stats.record_rejected();
        assert_eq!(stats.rejected(), 1);
    }

    #[test]
    fn test_bytes_per_leg() {
        let stats = ConnectionStats::new();
        stats.record_bytes(Leg::TransportToLocal, 100);
        stats.record_bytes(Leg::LocalToTransport, 40);
        stats.record_bytes(Leg::TransportToLocal, 1);

        assert_eq!(stats.bytes_to_local(), 101);
        assert_eq!(stats.bytes_to_transport(), 40);
    }

    #[test]
    fn test_stats_snapshot() {
        let stats = ConnectionStats::new();
        stats.record_accepted();
        stats.record_bytes(Leg::TransportToLocal, 100);
        stats.record_bytes(Leg::LocalToTransport, 200);
        stats.record_finished(true);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_accepted, 1);
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.total_bytes(), 300);
        assert!(snapshot.timestamp_ms > 0);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["bytes_to_local"], 100);
    }
}
