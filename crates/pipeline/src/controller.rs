//! Pipeline controller
//!
//! Wires the queue, spool, dead-letter sink, breaker, and egress worker
//! together and owns the lifecycle. All pipeline state lives inside the
//! instance; several controllers (one per egress destination) can
//! coexist in a process.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use otbridge_config::Config;
use otbridge_protocol::{DeadLetterReason, Quality, Record, SourceId, Value};
use otbridge_spool::{
    DeadLetterEntry, DeadLetterMetricsSnapshot, DeadLetterSink, SpoolConfig, SpoolError,
    SpoolMetricsSnapshot, SpoolStore,
};

use crate::breaker::{BreakerSettings, BreakerState, CircuitBreaker};
use crate::egress::EgressClient;
use crate::metrics::{PipelineMetrics, PipelineMetricsSnapshot};
use crate::now_ms;
use crate::queue::{self, BoundedQueue};
use crate::worker::{BatchingEgressWorker, WorkerSettings};
use crate::{PipelineError, Result};

/// A reading as a protocol adapter hands it in, before admission
/// metadata is assigned
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub source_id: SourceId,
    pub tag_path: String,
    pub value: Value,
    pub quality: Quality,
    /// Source-reported event time, unix millis
    pub event_time_ms: u64,
}

/// Outcome of a `submit` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitResult {
    /// The record will reach the egress client or the dead-letter sink
    Accepted,
    Rejected(RejectReason),
}

/// Why a submission was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Queue and spool are both at capacity; the adapter must shed or
    /// slow down
    SpoolFull,

    /// The spool has a latched I/O fault; durability cannot be promised
    SpoolUnavailable,

    /// `stop` has been called
    ShuttingDown,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::SpoolFull => "spool_full",
            RejectReason::SpoolUnavailable => "spool_unavailable",
            RejectReason::ShuttingDown => "shutting_down",
        }
    }
}

/// Point-in-time operational view for health endpoints and logs
#[derive(Debug, Clone)]
pub struct PipelineHealth {
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub spool_unread: u64,
    pub spool_bytes: u64,
    pub spool_segments: usize,
    pub spool_fault: bool,
    pub breaker_state: BreakerState,
    pub breaker_state_age: Duration,
    pub shutting_down: bool,
}

impl PipelineHealth {
    /// Healthy means admissions are being accepted with durability intact
    pub fn is_healthy(&self) -> bool {
        !self.spool_fault && !self.shutting_down
    }
}

/// Owns the whole ingestion pipeline for one egress destination
pub struct PipelineController {
    queue: BoundedQueue,
    spool: Arc<SpoolStore>,
    dead_letters: Arc<DeadLetterSink>,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<PipelineMetrics>,
    sequence: AtomicU64,
    spool_fault: Arc<AtomicBool>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PipelineController {
    /// Build the pipeline and spawn the egress worker
    ///
    /// Runs spool recovery first, so any backlog from a previous run is
    /// already queued for replay when the worker starts. Must be called
    /// from within a tokio runtime.
    pub fn start<C>(config: &Config, client: C) -> Result<Self>
    where
        C: EgressClient + 'static,
    {
        let spool = Arc::new(SpoolStore::open(SpoolConfig {
            dir: config.spool.dir.clone(),
            max_segment_bytes: config.spool.max_segment_bytes,
            max_segment_records: config.spool.max_segment_records,
            quota_bytes: config.spool.quota_bytes,
            io_retries: config.spool.io_retries,
            io_retry_delay: Duration::from_millis(config.spool.io_retry_delay_ms),
        })?);
        let dead_letters = Arc::new(DeadLetterSink::open(
            config.dead_letter.dir.clone(),
            config.dead_letter.io_retries,
        )?);

        let breaker = Arc::new(CircuitBreaker::new(BreakerSettings {
            failure_threshold: config.egress.breaker.failure_threshold,
            base_cooldown: Duration::from_secs(config.egress.breaker.base_cooldown_secs),
            max_cooldown: Duration::from_secs(config.egress.breaker.max_cooldown_secs),
            half_open_probes: config.egress.breaker.half_open_probes,
        }));

        let (queue, consumer) = queue::bounded(config.queue.capacity);
        let metrics = Arc::new(PipelineMetrics::new());
        let spool_fault = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        // Sequences must keep climbing across restarts so spooled records
        // from the previous run sort before anything new.
        let sequence = AtomicU64::new(spool.last_sequence());

        let worker = BatchingEgressWorker::new(
            consumer,
            Arc::clone(&spool),
            Arc::clone(&dead_letters),
            Arc::clone(&breaker),
            client,
            WorkerSettings {
                max_batch_size: config.egress.max_batch_size,
                max_batch_delay: Duration::from_millis(config.egress.max_batch_delay_ms),
                max_attempts: config.egress.max_attempts,
                hot_cold_ratio: config.egress.hot_cold_ratio,
            },
            cancel.clone(),
            Arc::clone(&metrics),
            Arc::clone(&spool_fault),
        );
        let handle = tokio::spawn(worker.run());

        tracing::info!(
            queue_capacity = config.queue.capacity,
            spool_dir = %config.spool.dir.display(),
            spool_backlog = spool.unread(),
            "pipeline started"
        );

        Ok(Self {
            queue,
            spool,
            dead_letters,
            breaker,
            metrics,
            sequence,
            spool_fault,
            cancel,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Admit one record
    ///
    /// Never blocks beyond a bounded spool write. Queue overflow falls
    /// through to the spool transparently; only spool exhaustion, a
    /// latched spool fault, or shutdown reach the caller.
    pub fn submit(&self, new: NewRecord) -> SubmitResult {
        self.metrics.record_submitted();

        if self.cancel.is_cancelled() {
            self.metrics.record_rejected();
            return SubmitResult::Rejected(RejectReason::ShuttingDown);
        }
        if self.spool_fault.load(Ordering::Relaxed) {
            self.metrics.record_rejected();
            return SubmitResult::Rejected(RejectReason::SpoolUnavailable);
        }

        let mut record = Record::new(
            new.source_id,
            new.tag_path,
            new.value,
            new.quality,
            new.event_time_ms,
        );
        record.ingest_time_ms = now_ms();
        record.sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;

        match self.queue.try_enqueue(record) {
            Ok(()) => {
                self.metrics.record_queued();
                SubmitResult::Accepted
            }
            Err(record) => match self.spool.append(&record) {
                Ok(()) => {
                    self.metrics.record_overflowed();
                    SubmitResult::Accepted
                }
                // A record the frame format cannot carry is terminal here;
                // it would be dead-lettered as schema-invalid before egress
                // anyway, and half-writing it would poison the segment.
                Err(SpoolError::Oversized(e)) => {
                    tracing::warn!(
                        error = %e,
                        source_id = %record.source_id,
                        tag_path = %record.tag_path,
                        sequence = record.sequence,
                        "record exceeds frame limits, dead-lettering at admission"
                    );
                    let now = now_ms();
                    let entry = DeadLetterEntry {
                        record,
                        reason: DeadLetterReason::SchemaInvalid,
                        first_failure_ms: now,
                        last_failure_ms: now,
                    };
                    if let Err(e) = self.dead_letters.commit(&entry) {
                        tracing::error!(error = %e, "dead-letter commit failed");
                    }
                    self.metrics.record_dead_lettered();
                    SubmitResult::Accepted
                }
                Err(e) if e.is_disk_full() => {
                    self.metrics.record_rejected();
                    tracing::warn!(
                        source_id = %record.source_id,
                        tag_path = %record.tag_path,
                        "record rejected, spool quota reached"
                    );
                    SubmitResult::Rejected(RejectReason::SpoolFull)
                }
                Err(e) => {
                    self.spool_fault.store(true, Ordering::Relaxed);
                    self.metrics.record_rejected();
                    tracing::error!(
                        error = %e,
                        source_id = %record.source_id,
                        tag_path = %record.tag_path,
                        "spool unavailable, rejecting admissions"
                    );
                    SubmitResult::Rejected(RejectReason::SpoolUnavailable)
                }
            },
        }
    }

    /// Stop the pipeline
    ///
    /// New submissions are rejected immediately; the worker gets the
    /// grace period to finish its in-flight batch and persist the queue
    /// to the spool. Whatever is not flushed in time is covered by spool
    /// recovery on the next start.
    pub async fn stop(&self, grace: Duration) -> Result<PipelineMetricsSnapshot> {
        let mut handle = self
            .worker
            .lock()
            .take()
            .ok_or(PipelineError::AlreadyStopped)?;

        tracing::info!(grace_ms = grace.as_millis() as u64, "pipeline stopping");
        self.cancel.cancel();

        match tokio::time::timeout(grace, &mut handle).await {
            Ok(joined) => joined?,
            Err(_) => {
                tracing::warn!("egress worker did not stop within grace period, aborting");
                handle.abort();
            }
        }

        let snapshot = self.metrics.snapshot();
        tracing::info!(
            delivered = snapshot.records_delivered,
            dead_lettered = snapshot.records_dead_lettered,
            spool_backlog = self.spool.unread(),
            "pipeline stopped"
        );
        Ok(snapshot)
    }

    /// Current operational state
    pub fn health(&self) -> PipelineHealth {
        PipelineHealth {
            queue_depth: self.queue.depth(),
            queue_capacity: self.queue.capacity(),
            spool_unread: self.spool.unread(),
            spool_bytes: self.spool.spooled_bytes(),
            spool_segments: self.spool.segment_count(),
            spool_fault: self.spool_fault.load(Ordering::Relaxed),
            breaker_state: self.breaker.state(),
            breaker_state_age: self.breaker.time_in_state(),
            shutting_down: self.cancel.is_cancelled(),
        }
    }

    /// Pipeline counters
    pub fn metrics(&self) -> PipelineMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Spool counters
    pub fn spool_metrics(&self) -> SpoolMetricsSnapshot {
        self.spool.metrics().snapshot()
    }

    /// Dead-letter counters
    pub fn dead_letter_metrics(&self) -> DeadLetterMetricsSnapshot {
        self.dead_letters.metrics().snapshot()
    }
}

impl std::fmt::Debug for PipelineController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineController")
            .field("queue_depth", &self.queue.depth())
            .field("spool_unread", &self.spool.unread())
            .field("breaker", &self.breaker.state())
            .field("shutting_down", &self.cancel.is_cancelled())
            .finish()
    }
}
