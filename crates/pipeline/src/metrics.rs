//! Pipeline metrics
//!
//! Lock-free counters shared between the admission path and the egress
//! worker via `Arc<PipelineMetrics>`. All operations use relaxed
//! ordering; values are eventually consistent, not real-time.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the ingestion pipeline
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Records offered to `submit` (accepted or not)
    records_submitted: AtomicU64,

    /// Records admitted into the in-memory queue
    records_queued: AtomicU64,

    /// Records spooled because the queue was full
    records_overflowed: AtomicU64,

    /// Submissions rejected (spool full, spool unavailable, or shutdown)
    records_rejected: AtomicU64,

    /// Batches handed to the egress client
    batches_sent: AtomicU64,

    /// Records acknowledged by the egress client
    records_delivered: AtomicU64,

    /// Batch attempts that failed transiently (includes timeouts)
    transient_failures: AtomicU64,

    /// Batch attempts short-circuited by the open breaker
    short_circuits: AtomicU64,

    /// Records re-appended to the spool for a later retry
    records_respooled: AtomicU64,

    /// Records committed to the dead-letter sink
    records_dead_lettered: AtomicU64,
}

impl PipelineMetrics {
    /// Create new metrics instance with all counters at zero
    pub const fn new() -> Self {
        Self {
            records_submitted: AtomicU64::new(0),
            records_queued: AtomicU64::new(0),
            records_overflowed: AtomicU64::new(0),
            records_rejected: AtomicU64::new(0),
            batches_sent: AtomicU64::new(0),
            records_delivered: AtomicU64::new(0),
            transient_failures: AtomicU64::new(0),
            short_circuits: AtomicU64::new(0),
            records_respooled: AtomicU64::new(0),
            records_dead_lettered: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_submitted(&self) {
        self.records_submitted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_queued(&self) {
        self.records_queued.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_overflowed(&self) {
        self.records_overflowed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_rejected(&self) {
        self.records_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn batch_sent(&self) {
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn records_delivered(&self, count: u64) {
        self.records_delivered.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn transient_failure(&self) {
        self.transient_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn short_circuit(&self) {
        self.short_circuits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn records_respooled(&self, count: u64) {
        self.records_respooled.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dead_lettered(&self) {
        self.records_dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of all metrics
    pub fn snapshot(&self) -> PipelineMetricsSnapshot {
        PipelineMetricsSnapshot {
            records_submitted: self.records_submitted.load(Ordering::Relaxed),
            records_queued: self.records_queued.load(Ordering::Relaxed),
            records_overflowed: self.records_overflowed.load(Ordering::Relaxed),
            records_rejected: self.records_rejected.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            records_delivered: self.records_delivered.load(Ordering::Relaxed),
            transient_failures: self.transient_failures.load(Ordering::Relaxed),
            short_circuits: self.short_circuits.load(Ordering::Relaxed),
            records_respooled: self.records_respooled.load(Ordering::Relaxed),
            records_dead_lettered: self.records_dead_lettered.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of pipeline metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineMetricsSnapshot {
    pub records_submitted: u64,
    pub records_queued: u64,
    pub records_overflowed: u64,
    pub records_rejected: u64,
    pub batches_sent: u64,
    pub records_delivered: u64,
    pub transient_failures: u64,
    pub short_circuits: u64,
    pub records_respooled: u64,
    pub records_dead_lettered: u64,
}

impl PipelineMetricsSnapshot {
    /// Compute the delta against an earlier snapshot, for rate reporting
    pub fn diff(&self, earlier: &PipelineMetricsSnapshot) -> PipelineMetricsSnapshot {
        PipelineMetricsSnapshot {
            records_submitted: self.records_submitted - earlier.records_submitted,
            records_queued: self.records_queued - earlier.records_queued,
            records_overflowed: self.records_overflowed - earlier.records_overflowed,
            records_rejected: self.records_rejected - earlier.records_rejected,
            batches_sent: self.batches_sent - earlier.batches_sent,
            records_delivered: self.records_delivered - earlier.records_delivered,
            transient_failures: self.transient_failures - earlier.transient_failures,
            short_circuits: self.short_circuits - earlier.short_circuits,
            records_respooled: self.records_respooled - earlier.records_respooled,
            records_dead_lettered: self.records_dead_lettered - earlier.records_dead_lettered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_diff() {
        let metrics = PipelineMetrics::new();
        metrics.record_submitted();
        metrics.record_queued();
        let first = metrics.snapshot();

        metrics.record_submitted();
        metrics.records_delivered(5);
        let second = metrics.snapshot();

        let delta = second.diff(&first);
        assert_eq!(delta.records_submitted, 1);
        assert_eq!(delta.records_queued, 0);
        assert_eq!(delta.records_delivered, 5);
    }
}
