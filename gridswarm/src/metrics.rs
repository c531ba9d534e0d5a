//! Dispatch counters.
//!
//! Cheap atomics bumped on the hot path and snapshotted for assertions and
//! operator visibility. These are the only observability surface besides
//! tracing.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters owned by the dispatcher.
#[derive(Debug, Default)]
pub(crate) struct DispatchMetrics {
    delivered: AtomicU64,
    dropped: AtomicU64,
    decode_failures: AtomicU64,
}

impl DispatchMetrics {
    pub(crate) fn delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the dispatch counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Messages decoded and routed.
    pub delivered: u64,
    /// Inbound messages dropped because the dispatch queue was full.
    pub dropped: u64,
    /// Inbound messages dropped because they failed to decode.
    pub decode_failures: u64,
}
