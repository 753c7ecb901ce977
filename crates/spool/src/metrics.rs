//! Spool metrics
//!
//! Atomic counters and gauges for the disk spool. All operations use
//! relaxed ordering; values are eventually consistent, not real-time.

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics for a `SpoolStore`
#[derive(Debug, Default)]
pub struct SpoolMetrics {
    /// Records appended (admission overflow + egress re-spools)
    records_appended: AtomicU64,

    /// Records handed to the egress worker by `read_next`
    records_read: AtomicU64,

    /// Records covered by durable acknowledgements
    records_acknowledged: AtomicU64,

    /// Appends rejected because the quota was reached
    appends_rejected_full: AtomicU64,

    /// Individual I/O retries performed
    io_retries: AtomicU64,

    /// Gauge: bytes currently on disk across all segments
    bytes_on_disk: AtomicU64,

    /// Gauge: segment files currently present
    segments: AtomicU64,
}

impl SpoolMetrics {
    /// Create new metrics instance with all counters at zero
    pub const fn new() -> Self {
        Self {
            records_appended: AtomicU64::new(0),
            records_read: AtomicU64::new(0),
            records_acknowledged: AtomicU64::new(0),
            appends_rejected_full: AtomicU64::new(0),
            io_retries: AtomicU64::new(0),
            bytes_on_disk: AtomicU64::new(0),
            segments: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_appended(&self) {
        self.records_appended.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn records_read(&self, count: u64) {
        self.records_read.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn records_acknowledged(&self, count: u64) {
        self.records_acknowledged.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_rejected_full(&self) {
        self.appends_rejected_full.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_io_retry(&self) {
        self.io_retries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_bytes_on_disk(&self, bytes: u64) {
        self.bytes_on_disk.store(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_segments(&self, count: u64) {
        self.segments.store(count, Ordering::Relaxed);
    }

    /// Gauge accessor used by the pipeline health surface
    #[inline]
    pub fn bytes_on_disk(&self) -> u64 {
        self.bytes_on_disk.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all metrics
    pub fn snapshot(&self) -> SpoolMetricsSnapshot {
        SpoolMetricsSnapshot {
            records_appended: self.records_appended.load(Ordering::Relaxed),
            records_read: self.records_read.load(Ordering::Relaxed),
            records_acknowledged: self.records_acknowledged.load(Ordering::Relaxed),
            appends_rejected_full: self.appends_rejected_full.load(Ordering::Relaxed),
            io_retries: self.io_retries.load(Ordering::Relaxed),
            bytes_on_disk: self.bytes_on_disk.load(Ordering::Relaxed),
            segments: self.segments.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of spool metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpoolMetricsSnapshot {
    pub records_appended: u64,
    pub records_read: u64,
    pub records_acknowledged: u64,
    pub appends_rejected_full: u64,
    pub io_retries: u64,
    pub bytes_on_disk: u64,
    pub segments: u64,
}
