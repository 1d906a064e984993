//! Engine counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared by the engine components
#[derive(Debug, Default)]
pub struct EngineStats {
    sent: AtomicU64,
    queued: AtomicU64,
    failed: AtomicU64,
    flushed: AtomicU64,
    inbound: AtomicU64,
    reconnect_attempts: AtomicU64,
}

impl EngineStats {
    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flushed(&self) {
        self.flushed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inbound(&self) {
        self.inbound.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EngineStatistics {
        EngineStatistics {
            sent: self.sent.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            flushed: self.flushed.load(Ordering::Relaxed),
            inbound: self.inbound.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStatistics {
    /// Messages confirmed on the connected path
    pub sent: u64,
    /// Messages placed in the offline queue
    pub queued: u64,
    /// Connected-path sends that were rolled back
    pub failed: u64,
    /// Queued messages confirmed by a flush
    pub flushed: u64,
    /// Messages pushed by the server
    pub inbound: u64,
    /// Automatic reconnect attempts
    pub reconnect_attempts: u64,
}

impl EngineStatistics {
    /// Share of outbound messages that ended confirmed
    pub fn confirmation_rate(&self) -> f64 {
        let confirmed = self.sent + self.flushed;
        let total = confirmed + self.failed;
        if total == 0 {
            0.0
        } else {
            confirmed as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_and_rate() {
        let stats = EngineStats::default();
        assert_eq!(stats.snapshot().confirmation_rate(), 0.0);

        stats.record_sent();
        stats.record_flushed();
        stats.record_failed();
        stats.record_queued();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.sent, 1);
        assert_eq!(snapshot.queued, 1);
        assert!((snapshot.confirmation_rate() - 2.0 / 3.0).abs() < f64::EPSILON);
    }
}
