//! Batching egress worker
//!
//! The single consumer that drains the admission queue (hot path) and
//! the spool (cold path), forms size/time-bounded batches, and drives
//! them through the circuit breaker to the egress client.
//!
//! # Path weighting
//!
//! The hot path is preferred for latency, but after `hot_cold_ratio`
//! queue batches the worker takes one spool batch so a standing backlog
//! keeps draining under continuous live traffic. Spool reads are also
//! gated by an exponential backoff that grows while egress keeps
//! failing, so a dead endpoint does not cause a tight re-read/re-spool
//! loop.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use otbridge_protocol::{DeadLetterReason, Record};
use otbridge_spool::{DeadLetterEntry, DeadLetterSink, SpoolError, SpoolStore};

use crate::breaker::CircuitBreaker;
use crate::egress::{EgressClient, SendOutcome};
use crate::metrics::PipelineMetrics;
use crate::now_ms;
use crate::queue::QueueConsumer;

/// Base delay before re-reading the spool after a failed delivery
const SPOOL_RETRY_BASE: Duration = Duration::from_millis(500);

/// Ceiling for the spool re-read backoff
const SPOOL_RETRY_CAP: Duration = Duration::from_secs(60);

/// Worker tuning, assembled by the controller from the egress config
#[derive(Debug, Clone)]
pub(crate) struct WorkerSettings {
    pub max_batch_size: usize,
    pub max_batch_delay: Duration,
    pub max_attempts: u32,
    pub hot_cold_ratio: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchOrigin {
    Queue,
    Spool,
}

pub(crate) struct BatchingEgressWorker<C> {
    consumer: QueueConsumer,
    spool: Arc<SpoolStore>,
    dead_letters: Arc<DeadLetterSink>,
    breaker: Arc<CircuitBreaker>,
    client: C,
    settings: WorkerSettings,
    cancel: CancellationToken,
    metrics: Arc<PipelineMetrics>,
    spool_fault: Arc<AtomicBool>,

    /// First transient-failure time per sequence, for DLQ entries
    first_failures: HashMap<u64, u64>,

    /// Queue batches delivered since the last spool turn
    hot_turns: u32,

    /// Earliest time the next spool read may happen
    spool_retry_at: Instant,

    /// Current spool re-read backoff
    spool_backoff: Duration,
}

impl<C: EgressClient> BatchingEgressWorker<C> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        consumer: QueueConsumer,
        spool: Arc<SpoolStore>,
        dead_letters: Arc<DeadLetterSink>,
        breaker: Arc<CircuitBreaker>,
        client: C,
        settings: WorkerSettings,
        cancel: CancellationToken,
        metrics: Arc<PipelineMetrics>,
        spool_fault: Arc<AtomicBool>,
    ) -> Self {
        Self {
            consumer,
            spool,
            dead_letters,
            breaker,
            client,
            settings,
            cancel,
            metrics,
            spool_fault,
            first_failures: HashMap::new(),
            hot_turns: 0,
            spool_retry_at: Instant::now(),
            spool_backoff: SPOOL_RETRY_BASE,
        }
    }

    /// Run until cancelled
    ///
    /// Spawn as a tokio task. On cancellation, any records still in the
    /// in-memory queue are persisted to the spool so the next start
    /// replays them.
    pub(crate) async fn run(mut self) {
        tracing::info!(
            batch_size = self.settings.max_batch_size,
            batch_delay_ms = self.settings.max_batch_delay.as_millis() as u64,
            max_attempts = self.settings.max_attempts,
            "egress worker started"
        );

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            if self.spool_turn_due() {
                self.hot_turns = 0;
                if self.deliver_from_spool().await {
                    continue;
                }
            }

            let idle_wait = self.idle_wait();
            let first = tokio::select! {
                _ = self.cancel.cancelled() => break,
                record = self.consumer.recv() => match record {
                    Some(record) => record,
                    None => break,
                },
                _ = tokio::time::sleep(idle_wait) => {
                    // Queue went quiet; give the spool the next turn.
                    self.hot_turns = self.settings.hot_cold_ratio;
                    continue;
                }
            };

            let batch = self.fill_batch(first).await;
            self.hot_turns += 1;
            self.deliver(batch, BatchOrigin::Queue).await;
        }

        self.drain_queue_to_spool();

        let snapshot = self.metrics.snapshot();
        tracing::info!(
            delivered = snapshot.records_delivered,
            dead_lettered = snapshot.records_dead_lettered,
            respooled = snapshot.records_respooled,
            transient_failures = snapshot.transient_failures,
            short_circuits = snapshot.short_circuits,
            "egress worker stopped"
        );
    }

    fn spool_turn_due(&self) -> bool {
        self.spool.has_backlog()
            && Instant::now() >= self.spool_retry_at
            && self.hot_turns >= self.settings.hot_cold_ratio
    }

    /// How long to wait on an empty queue before reconsidering the spool
    fn idle_wait(&self) -> Duration {
        if self.spool.has_backlog() {
            self.spool_retry_at
                .saturating_duration_since(Instant::now())
                .max(Duration::from_millis(10))
                .min(self.settings.max_batch_delay)
        } else {
            self.settings.max_batch_delay
        }
    }

    /// Accumulate queue records behind `first` until the batch is full
    /// or the delay budget elapses
    async fn fill_batch(&mut self, first: Record) -> Vec<Record> {
        let mut batch = Vec::with_capacity(self.settings.max_batch_size);
        batch.push(first);
        let deadline = Instant::now() + self.settings.max_batch_delay;

        while batch.len() < self.settings.max_batch_size {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep_until(deadline) => break,
                record = self.consumer.recv() => match record {
                    Some(record) => batch.push(record),
                    None => break,
                },
            }
        }
        batch
    }

    /// Take one batch from the spool; false if nothing was processed
    async fn deliver_from_spool(&mut self) -> bool {
        let batch = match self.spool.read_next(self.settings.max_batch_size) {
            Ok(batch) => batch,
            Err(e) => {
                self.spool_fault.store(true, Ordering::Relaxed);
                tracing::error!(error = %e, "spool read failed");
                self.bump_spool_backoff();
                return false;
            }
        };
        if batch.is_empty() {
            return false;
        }
        self.deliver(batch, BatchOrigin::Spool).await;
        true
    }

    async fn deliver(&mut self, batch: Vec<Record>, origin: BatchOrigin) {
        // Spool acknowledgement must cover the whole read batch even when
        // some of it is dead-lettered rather than delivered.
        let last_sequence = batch.last().map(|r| r.sequence).unwrap_or(0);

        let mut valid = Vec::with_capacity(batch.len());
        for mut record in batch {
            if record.is_schema_valid() {
                valid.push(record);
            } else {
                record.attempt_count += 1;
                tracing::warn!(
                    source_id = %record.source_id,
                    tag_path = %record.tag_path,
                    sequence = record.sequence,
                    "record failed schema validation"
                );
                self.dead_letter(record, DeadLetterReason::SchemaInvalid);
            }
        }
        if valid.is_empty() {
            self.finish_spool_batch(origin, last_sequence);
            return;
        }

        if !self.breaker.try_acquire() {
            self.metrics.short_circuit();
            tracing::debug!(records = valid.len(), "delivery short-circuited by open breaker");
            self.retry_later(valid, origin, last_sequence);
            return;
        }

        self.metrics.batch_sent();
        match self.client.send_batch(&valid).await {
            SendOutcome::Ack => {
                self.breaker.record_success();
                self.metrics.records_delivered(valid.len() as u64);
                for record in &valid {
                    self.first_failures.remove(&record.sequence);
                }
                tracing::debug!(records = valid.len(), origin = ?origin, "batch acknowledged");
                self.finish_spool_batch(origin, last_sequence);
                self.reset_spool_backoff();
            }
            SendOutcome::Transient(message) => {
                self.breaker.record_failure();
                self.metrics.transient_failure();
                tracing::warn!(
                    records = valid.len(),
                    error = %message,
                    "transient egress failure, scheduling retry"
                );
                self.retry_later(valid, origin, last_sequence);
            }
            SendOutcome::Permanent { reason, offenders } => {
                // The endpoint answered; it is reachable.
                self.breaker.record_success();
                self.handle_permanent(valid, reason, offenders);
                self.finish_spool_batch(origin, last_sequence);
            }
        }
    }

    /// Transient failure or open breaker: charge an attempt to every
    /// record, dead-letter the exhausted ones, re-spool the rest
    fn retry_later(&mut self, records: Vec<Record>, origin: BatchOrigin, last_sequence: u64) {
        let now = now_ms();
        for mut record in records {
            record.attempt_count += 1;
            self.first_failures.entry(record.sequence).or_insert(now);

            if record.attempt_count >= self.settings.max_attempts {
                tracing::warn!(
                    source_id = %record.source_id,
                    tag_path = %record.tag_path,
                    sequence = record.sequence,
                    attempts = record.attempt_count,
                    "retries exhausted"
                );
                self.dead_letter(record, DeadLetterReason::MaxRetriesExceeded);
            } else {
                self.respool(record);
            }
        }
        self.finish_spool_batch(origin, last_sequence);
        self.bump_spool_backoff();
    }

    /// Permanent rejection: dead-letter the offenders, re-spool the rest
    /// without charging them an attempt
    fn handle_permanent(
        &mut self,
        records: Vec<Record>,
        reason: DeadLetterReason,
        offenders: Vec<usize>,
    ) {
        let whole_batch = offenders.is_empty();
        let offender_set: HashSet<usize> = offenders.into_iter().collect();

        for (idx, mut record) in records.into_iter().enumerate() {
            if whole_batch || offender_set.contains(&idx) {
                record.attempt_count += 1;
                tracing::warn!(
                    source_id = %record.source_id,
                    tag_path = %record.tag_path,
                    sequence = record.sequence,
                    reason = reason.as_str(),
                    "record permanently rejected by egress"
                );
                self.dead_letter(record, reason);
            } else {
                self.respool(record);
            }
        }
    }

    /// Re-append a record to the spool for a later attempt
    fn respool(&mut self, record: Record) {
        match self.spool.append(&record) {
            Ok(()) => {
                self.metrics.records_respooled(1);
            }
            Err(e) if e.is_disk_full() => {
                tracing::warn!(
                    source_id = %record.source_id,
                    tag_path = %record.tag_path,
                    sequence = record.sequence,
                    "spool full while re-spooling, dead-lettering"
                );
                self.dead_letter(record, DeadLetterReason::MaxRetriesExceeded);
            }
            Err(e) => {
                self.spool_fault.store(true, Ordering::Relaxed);
                tracing::error!(
                    error = %e,
                    source_id = %record.source_id,
                    tag_path = %record.tag_path,
                    sequence = record.sequence,
                    "spool unavailable while re-spooling, dead-lettering"
                );
                self.dead_letter(record, DeadLetterReason::MaxRetriesExceeded);
            }
        }
    }

    fn dead_letter(&mut self, record: Record, reason: DeadLetterReason) {
        let now = now_ms();
        let first = self.first_failures.remove(&record.sequence).unwrap_or(now);
        let entry = DeadLetterEntry {
            record,
            reason,
            first_failure_ms: first,
            last_failure_ms: now,
        };
        if let Err(e) = self.dead_letters.commit(&entry) {
            tracing::error!(error = %e, "dead-letter commit failed");
        }
        self.metrics.record_dead_lettered();
    }

    /// Advance the durable spool checkpoint past a consumed spool batch
    fn finish_spool_batch(&mut self, origin: BatchOrigin, last_sequence: u64) {
        if origin != BatchOrigin::Spool {
            return;
        }
        if let Err(e) = self.spool.acknowledge(last_sequence) {
            self.spool_fault.store(true, Ordering::Relaxed);
            tracing::error!(error = %e, "failed to advance spool checkpoint");
        }
    }

    fn bump_spool_backoff(&mut self) {
        self.spool_retry_at = Instant::now() + self.spool_backoff;
        self.spool_backoff = self.spool_backoff.saturating_mul(2).min(SPOOL_RETRY_CAP);
    }

    fn reset_spool_backoff(&mut self) {
        self.spool_backoff = SPOOL_RETRY_BASE;
        self.spool_retry_at = Instant::now();
    }

    /// Persist whatever is still queued so a restart replays it
    ///
    /// Records the spool cannot take go to the dead-letter sink rather
    /// than being dropped; the sink is the only sanctioned loss point.
    fn drain_queue_to_spool(&mut self) {
        let mut drained = 0u64;
        let mut dead = 0u64;
        let mut spool_down = false;
        while let Some(record) = self.consumer.try_recv() {
            if spool_down {
                self.dead_letter(record, DeadLetterReason::MaxRetriesExceeded);
                dead += 1;
                continue;
            }
            match self.spool.append(&record) {
                Ok(()) => drained += 1,
                Err(SpoolError::Oversized(e)) => {
                    tracing::warn!(
                        error = %e,
                        source_id = %record.source_id,
                        tag_path = %record.tag_path,
                        "queued record does not fit the spool frame, dead-lettering"
                    );
                    self.dead_letter(record, DeadLetterReason::SchemaInvalid);
                    dead += 1;
                }
                Err(e) => {
                    if !e.is_disk_full() {
                        self.spool_fault.store(true, Ordering::Relaxed);
                    }
                    tracing::error!(
                        error = %e,
                        source_id = %record.source_id,
                        tag_path = %record.tag_path,
                        "spool cannot take queued records during shutdown, dead-lettering"
                    );
                    self.dead_letter(record, DeadLetterReason::MaxRetriesExceeded);
                    dead += 1;
                    spool_down = true;
                }
            }
        }
        if drained > 0 {
            tracing::info!(records = drained, "drained in-memory queue to spool");
        }
        if dead > 0 {
            tracing::warn!(
                records = dead,
                "dead-lettered queued records the spool could not take during shutdown"
            );
        }
    }
}
