//! Spool error types

use std::io;

use thiserror::Error;

/// Errors from spool and dead-letter storage
#[derive(Debug, Error)]
pub enum SpoolError {
    /// The configured on-disk quota is exhausted
    ///
    /// This is the pipeline's ultimate backpressure signal: the caller
    /// must surface it to producers rather than retry.
    #[error("spool quota of {quota_bytes} bytes reached")]
    DiskFull { quota_bytes: u64 },

    /// I/O failure that persisted through the bounded retries
    #[error("spool I/O failed after {attempts} attempts: {source}")]
    Io {
        attempts: u32,
        #[source]
        source: io::Error,
    },

    /// A segment frame could not be decoded
    #[error("segment {segment} is corrupt: {source}")]
    Corrupt {
        segment: String,
        #[source]
        source: otbridge_protocol::ProtocolError,
    },

    /// The record's fields do not fit the frame format
    #[error("record cannot be framed: {0}")]
    Oversized(#[source] otbridge_protocol::ProtocolError),

    /// The checkpoint file exists but cannot be parsed
    #[error("checkpoint file corrupt: {0}")]
    CheckpointCorrupt(String),
}

impl SpoolError {
    /// Wrap a single-shot I/O failure (one attempt, no retries applicable)
    pub(crate) fn io(source: io::Error) -> Self {
        Self::Io {
            attempts: 1,
            source,
        }
    }

    /// True if this error means "stop admitting, disk budget is spent"
    /// rather than "the disk itself is failing".
    pub fn is_disk_full(&self) -> bool {
        matches!(self, SpoolError::DiskFull { .. })
    }
}
