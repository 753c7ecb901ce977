//! OT Bridge Pipeline - the ingestion resilience core
//!
//! Protocol adapters call [`PipelineController::submit`]; everything
//! downstream of that call is this crate's job:
//!
//! ```text
//! submit --> BoundedQueue --(full)--> SpoolStore (disk)
//!                |                        |
//!                +---- egress worker <----+   (4:1 hot/cold drain)
//!                           |
//!                   CircuitBreaker gate
//!                           |
//!                    EgressClient::send_batch
//!                     |        |         |
//!                    Ack   Transient  Permanent
//!                     |        |         |
//!                   done   re-spool   DeadLetterSink
//!                        (max_attempts)
//! ```
//!
//! # Guarantees
//!
//! - Accepted records reach the egress client's ack or the dead-letter
//!   sink, across restarts (at-least-once, via spool replay).
//! - Memory is bounded by the queue capacity, disk by the spool quota;
//!   both exhaustions surface as explicit rejections at `submit`.
//! - Per-source delivery order is non-decreasing in `sequence` as long
//!   as a source's records all take the same path (queue or spool).

mod breaker;
mod controller;
mod egress;
mod error;
mod metrics;
mod queue;
mod worker;

pub use breaker::{BreakerSettings, BreakerState, CircuitBreaker};
pub use controller::{
    NewRecord, PipelineController, PipelineHealth, RejectReason, SubmitResult,
};
pub use egress::{EgressClient, SendOutcome};
pub use error::PipelineError;
pub use metrics::{PipelineMetrics, PipelineMetricsSnapshot};
pub use queue::{bounded, BoundedQueue, QueueConsumer};

/// Result type for pipeline lifecycle operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Current wall-clock time as unix milliseconds
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
