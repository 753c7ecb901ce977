//! Egress client contract
//!
//! The pipeline only consumes this call surface; the concrete wire
//! protocol (HTTP, gRPC, MQTT bridge) lives in the adapter crates.

use async_trait::async_trait;

use otbridge_protocol::{DeadLetterReason, Record};

/// Result of one batch submission to the cloud endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The whole batch was durably accepted
    Ack,

    /// Retryable failure (timeout, connection refused, 5xx-equivalent);
    /// the message is for logs only and never drives control flow
    Transient(String),

    /// Non-retryable rejection
    Permanent {
        reason: DeadLetterReason,
        /// Indices into the submitted batch of the records the endpoint
        /// rejected; empty means the whole batch is at fault
        offenders: Vec<usize>,
    },
}

/// Client that transmits batched records to the cloud endpoint
///
/// Implementations must be cheap to call concurrently and enforce their
/// own request timeout; the breaker bounds how often a dead endpoint is
/// attempted, not how long one attempt may hang.
#[async_trait]
pub trait EgressClient: Send + Sync {
    async fn send_batch(&self, records: &[Record]) -> SendOutcome;
}
