//! DeadLetterSink - terminal parking for undeliverable records
//!
//! One JSON Lines file per reason under the dead-letter directory, so
//! operators can triage schema failures separately from retry
//! exhaustion. Entries are never read back by the pipeline; replay is a
//! manual, out-of-band operation.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use otbridge_protocol::{DeadLetterReason, Record};

use crate::{Result, SpoolError};

/// One parked record with its failure context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub record: Record,
    pub reason: DeadLetterReason,
    /// First time this record failed, unix millis
    pub first_failure_ms: u64,
    /// Most recent failure, unix millis
    pub last_failure_ms: u64,
}

/// Dead-letter counters
#[derive(Debug, Default)]
pub struct DeadLetterMetrics {
    entries_committed: AtomicU64,
    write_failures: AtomicU64,
}

/// Point-in-time copy of [`DeadLetterMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeadLetterMetricsSnapshot {
    pub entries_committed: u64,
    pub write_failures: u64,
}

impl DeadLetterMetrics {
    pub fn snapshot(&self) -> DeadLetterMetricsSnapshot {
        DeadLetterMetricsSnapshot {
            entries_committed: self.entries_committed.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}

/// Append-only sink of records the pipeline has given up on
pub struct DeadLetterSink {
    dir: PathBuf,
    io_retries: u32,
    io_retry_delay: Duration,
    // Serializes appends so concurrent commits cannot interleave lines.
    write_lock: Mutex<()>,
    metrics: Arc<DeadLetterMetrics>,
}

impl DeadLetterSink {
    /// Open (creating the directory if needed)
    pub fn open(dir: impl Into<PathBuf>, io_retries: u32) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(SpoolError::io)?;
        Ok(Self {
            dir,
            io_retries,
            io_retry_delay: Duration::from_millis(10),
            write_lock: Mutex::new(()),
            metrics: Arc::new(DeadLetterMetrics::default()),
        })
    }

    /// Park one record under its reason's file
    ///
    /// Retries bounded times on I/O failure. If every attempt fails the
    /// record is dropped and counted; a dead-letter write failure must
    /// not take the pipeline down with it.
    pub fn commit(&self, entry: &DeadLetterEntry) -> Result<()> {
        let line = match serde_json::to_string(entry) {
            Ok(line) => line,
            Err(e) => {
                // Record payloads are plain data; this should not happen.
                self.metrics.write_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    sequence = entry.record.sequence,
                    source_id = %entry.record.source_id,
                    tag_path = %entry.record.tag_path,
                    error = %e,
                    "dropping dead-letter entry that failed to serialize"
                );
                return Ok(());
            }
        };

        let path = self.reason_path(entry.reason);
        let _guard = self.write_lock.lock();

        let mut attempts = 0;
        loop {
            match self.append_line(&path, &line) {
                Ok(()) => {
                    self.metrics.entries_committed.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        sequence = entry.record.sequence,
                        reason = entry.reason.as_str(),
                        source_id = %entry.record.source_id,
                        "record dead-lettered"
                    );
                    return Ok(());
                }
                Err(source) => {
                    attempts += 1;
                    if attempts > self.io_retries {
                        self.metrics.write_failures.fetch_add(1, Ordering::Relaxed);
                        tracing::error!(
                            sequence = entry.record.sequence,
                            source_id = %entry.record.source_id,
                            tag_path = %entry.record.tag_path,
                            reason = entry.reason.as_str(),
                            attempts,
                            error = %source,
                            "dropping record after repeated dead-letter write failures"
                        );
                        return Ok(());
                    }
                    tracing::debug!(attempt = attempts, error = %source, "retrying dead-letter write");
                    std::thread::sleep(self.io_retry_delay);
                }
            }
        }
    }

    /// Path of the JSONL file for a reason
    pub fn reason_path(&self, reason: DeadLetterReason) -> PathBuf {
        self.dir.join(format!("{}.jsonl", reason.as_str()))
    }

    /// Shared metrics handle
    pub fn metrics(&self) -> Arc<DeadLetterMetrics> {
        Arc::clone(&self.metrics)
    }

    fn append_line(&self, path: &std::path::Path, line: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()
    }
}

impl std::fmt::Debug for DeadLetterSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadLetterSink")
            .field("dir", &self.dir)
            .field("io_retries", &self.io_retries)
            .finish()
    }
}
