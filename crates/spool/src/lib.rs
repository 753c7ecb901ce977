//! OT Bridge Spool - durable overflow storage for the ingestion pipeline
//!
//! Two stores live here:
//!
//! - [`SpoolStore`] - an append-only, segment-based disk log that absorbs
//!   records the in-memory queue rejected and survives process restarts.
//!   A small checkpoint file records the durable read position so a
//!   restart replays exactly the unacknowledged suffix (at-least-once).
//! - [`DeadLetterSink`] - the terminal store for records the pipeline has
//!   definitively given up on, one JSON-lines file per reason, kept for
//!   operator inspection instead of silent discard.
//!
//! # Persisted layout
//!
//! ```text
//! {spool_dir}/spool-0000000001.seg     sealed segment (read-only)
//! {spool_dir}/spool-0000000002.seg     open segment (appends go here)
//! {spool_dir}/checkpoint.json          { "segment_id": 1, "read_offset": 472 }
//!
//! {dlq_dir}/schema_invalid.jsonl
//! {dlq_dir}/max_retries.jsonl
//! {dlq_dir}/poison_payload.jsonl
//! ```
//!
//! # Durability contract
//!
//! Appends are whole frames, flushed before the append returns. The
//! checkpoint is written to a temp file and atomically renamed. A frame
//! torn by a crash is truncated away on recovery; every frame at or past
//! the checkpoint is replayed. No transactions are needed: ordered,
//! idempotent-on-replay appends plus the checkpointed offset are enough.

mod checkpoint;
mod dead_letter;
mod error;
mod metrics;
mod segment;
mod store;

pub use checkpoint::Checkpoint;
pub use dead_letter::{DeadLetterEntry, DeadLetterMetrics, DeadLetterMetricsSnapshot, DeadLetterSink};
pub use error::SpoolError;
pub use metrics::{SpoolMetrics, SpoolMetricsSnapshot};
pub use store::{SpoolConfig, SpoolStore};

/// Result type for spool operations
pub type Result<T> = std::result::Result<T, SpoolError>;

#[cfg(test)]
mod store_test;
