//! Pipeline error types

use thiserror::Error;

/// Errors surfaced by pipeline lifecycle operations
///
/// Per-record conditions (queue full, spool full, shutting down) are not
/// errors; they are expressed through [`crate::SubmitResult`].
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The spool could not be opened or recovered
    #[error("spool error: {0}")]
    Spool(#[from] otbridge_spool::SpoolError),

    /// The egress worker task ended abnormally
    #[error("egress worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    /// `stop` was called more than once
    #[error("pipeline already stopped")]
    AlreadyStopped,
}
