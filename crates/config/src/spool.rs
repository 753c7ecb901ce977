//! Spool and dead-letter store configuration

use std::path::PathBuf;

use serde::Deserialize;

/// Default maximum size of one spool segment file (64 MiB)
pub const DEFAULT_SEGMENT_BYTES: u64 = 64 * 1024 * 1024;

/// Default maximum records per segment
pub const DEFAULT_SEGMENT_RECORDS: u64 = 100_000;

/// Default total on-disk quota for the spool (1 GiB)
pub const DEFAULT_QUOTA_BYTES: u64 = 1024 * 1024 * 1024;

/// Default bounded retries for a failing spool write
pub const DEFAULT_IO_RETRIES: u32 = 3;

/// Disk-backed overflow spool settings
///
/// # Example
///
/// ```toml
/// [spool]
/// dir = "/var/lib/otbridge/spool"
/// quota_bytes = 536870912
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpoolConfig {
    /// Directory holding segment files and the checkpoint
    pub dir: PathBuf,

    /// Segment rotation threshold in bytes
    pub max_segment_bytes: u64,

    /// Segment rotation threshold in records
    pub max_segment_records: u64,

    /// Total spool quota; `append` fails deterministically at this bound
    pub quota_bytes: u64,

    /// Bounded retries before an I/O error escalates
    pub io_retries: u32,

    /// Delay between I/O retries in milliseconds
    pub io_retry_delay_ms: u64,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("spool"),
            max_segment_bytes: DEFAULT_SEGMENT_BYTES,
            max_segment_records: DEFAULT_SEGMENT_RECORDS,
            quota_bytes: DEFAULT_QUOTA_BYTES,
            io_retries: DEFAULT_IO_RETRIES,
            io_retry_delay_ms: 10,
        }
    }
}

/// Dead-letter store settings
///
/// # Example
///
/// ```toml
/// [dead_letter]
/// dir = "/var/lib/otbridge/dlq"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeadLetterConfig {
    /// Directory holding one append-only JSON-lines file per reason
    pub dir: PathBuf,

    /// Bounded retries before a DLQ write failure is counted and dropped
    pub io_retries: u32,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("dlq"),
            io_retries: DEFAULT_IO_RETRIES,
        }
    }
}
