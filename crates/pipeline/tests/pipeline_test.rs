//! End-to-end pipeline tests
//!
//! These drive a full controller (queue, spool on a temp dir, dead
//! letters, breaker, worker) against a scriptable egress client and
//! verify the delivery guarantees: overflow without loss, breaker
//! fast-fail, permanent rejection, retry exhaustion, and restart replay.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use otbridge_config::Config;
use otbridge_pipeline::{
    BreakerState, EgressClient, NewRecord, PipelineController, RejectReason, SendOutcome,
    SubmitResult,
};
use otbridge_protocol::{Quality, Record, Value};

/// Egress client with a scripted outcome queue and a fallback outcome
#[derive(Clone)]
struct MockEgress {
    inner: Arc<MockInner>,
}

struct MockInner {
    script: Mutex<VecDeque<SendOutcome>>,
    fallback: Mutex<SendOutcome>,
    calls: AtomicU64,
    delivered: Mutex<Vec<u64>>,
    delay: Mutex<Duration>,
}

impl MockEgress {
    fn always(outcome: SendOutcome) -> Self {
        Self {
            inner: Arc::new(MockInner {
                script: Mutex::new(VecDeque::new()),
                fallback: Mutex::new(outcome),
                calls: AtomicU64::new(0),
                delivered: Mutex::new(Vec::new()),
                delay: Mutex::new(Duration::ZERO),
            }),
        }
    }

    fn acking() -> Self {
        Self::always(SendOutcome::Ack)
    }

    fn script(&self, outcomes: impl IntoIterator<Item = SendOutcome>) {
        self.inner.script.lock().unwrap().extend(outcomes);
    }

    fn set_fallback(&self, outcome: SendOutcome) {
        *self.inner.fallback.lock().unwrap() = outcome;
    }

    /// Make every send take this long, to hold the worker mid-delivery
    fn set_delay(&self, delay: Duration) {
        *self.inner.delay.lock().unwrap() = delay;
    }

    fn calls(&self) -> u64 {
        self.inner.calls.load(Ordering::SeqCst)
    }

    /// Sequences acknowledged, in delivery order
    fn delivered(&self) -> Vec<u64> {
        self.inner.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl EgressClient for MockEgress {
    async fn send_batch(&self, records: &[Record]) -> SendOutcome {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.inner.delay.lock().unwrap();
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }
        let outcome = self
            .inner
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.inner.fallback.lock().unwrap().clone());
        if outcome == SendOutcome::Ack {
            let mut delivered = self.inner.delivered.lock().unwrap();
            delivered.extend(records.iter().map(|r| r.sequence));
        }
        outcome
    }
}

fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.queue.capacity = 64;
    config.spool.dir = root.join("spool");
    config.dead_letter.dir = root.join("dlq");
    config.egress.max_batch_size = 50;
    config.egress.max_batch_delay_ms = 20;
    config
}

fn test_record(tag: &str) -> NewRecord {
    NewRecord {
        source_id: "opcua-plant-a".into(),
        tag_path: format!("mining/crusher_1/{tag}"),
        value: Value::Float(387.5),
        quality: Quality::Good,
        event_time_ms: 1_700_000_000_000,
    }
}

async fn wait_for(mut condition: impl FnMut() -> bool, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_overflow_spills_to_spool_and_everything_is_delivered() {
    let root = tempfile::tempdir().unwrap();
    let egress = MockEgress::acking();
    let controller = PipelineController::start(&test_config(root.path()), egress.clone()).unwrap();

    for i in 0..200 {
        assert_eq!(
            controller.submit(test_record(&format!("tag_{i}"))),
            SubmitResult::Accepted
        );
        assert!(controller.health().queue_depth <= 64);
    }

    wait_for(
        || controller.metrics().records_delivered == 200,
        "all 200 records delivered",
    )
    .await;

    let metrics = controller.metrics();
    assert!(metrics.records_overflowed > 0, "expected queue overflow");
    assert_eq!(
        metrics.records_queued + metrics.records_overflowed,
        200
    );
    assert_eq!(metrics.records_dead_lettered, 0);

    controller.stop(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_queue_only_delivery_preserves_sequence_order() {
    let root = tempfile::tempdir().unwrap();
    let mut config = test_config(root.path());
    config.queue.capacity = 1_000; // no overflow
    let egress = MockEgress::acking();
    let controller = PipelineController::start(&config, egress.clone()).unwrap();

    for i in 0..100 {
        assert_eq!(
            controller.submit(test_record(&format!("tag_{i}"))),
            SubmitResult::Accepted
        );
    }
    wait_for(
        || controller.metrics().records_delivered == 100,
        "all 100 records delivered",
    )
    .await;

    let delivered = egress.delivered();
    assert_eq!(delivered.len(), 100);
    assert!(
        delivered.windows(2).all(|w| w[0] < w[1]),
        "queue-only delivery out of order: {delivered:?}"
    );

    controller.stop(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_breaker_opens_and_short_circuits_without_calling_egress() {
    let root = tempfile::tempdir().unwrap();
    let mut config = test_config(root.path());
    config.egress.breaker.failure_threshold = 2;
    config.egress.breaker.base_cooldown_secs = 3_600; // never half-opens here
    config.egress.max_attempts = 100; // keep records cycling, not dead-lettering

    let egress = MockEgress::always(SendOutcome::Transient("connection refused".into()));
    let controller = PipelineController::start(&config, egress.clone()).unwrap();

    for i in 0..10 {
        controller.submit(test_record(&format!("tag_{i}")));
    }

    wait_for(
        || controller.health().breaker_state == BreakerState::Open,
        "breaker to open",
    )
    .await;
    let calls_at_open = egress.calls();
    assert_eq!(calls_at_open, 2);

    wait_for(
        || controller.metrics().short_circuits >= 1,
        "a short-circuited delivery attempt",
    )
    .await;
    assert_eq!(egress.calls(), calls_at_open, "open breaker let a call through");
    assert_eq!(controller.metrics().records_delivered, 0);

    controller.stop(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_breaker_recovers_through_half_open_probe() {
    let root = tempfile::tempdir().unwrap();
    let mut config = test_config(root.path());
    config.egress.breaker.failure_threshold = 2;
    config.egress.breaker.base_cooldown_secs = 1;
    config.egress.max_attempts = 100;

    let egress = MockEgress::always(SendOutcome::Transient("timeout".into()));
    let controller = PipelineController::start(&config, egress.clone()).unwrap();

    for i in 0..5 {
        controller.submit(test_record(&format!("tag_{i}")));
    }
    wait_for(
        || controller.health().breaker_state == BreakerState::Open,
        "breaker to open",
    )
    .await;

    // Endpoint comes back; the probe after the cooldown should close the
    // breaker and the backlog should drain.
    egress.set_fallback(SendOutcome::Ack);
    wait_for(
        || controller.metrics().records_delivered == 5,
        "backlog delivered after recovery",
    )
    .await;
    assert_eq!(controller.health().breaker_state, BreakerState::Closed);

    controller.stop(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_permanent_rejection_dead_letters_once_without_retry() {
    let root = tempfile::tempdir().unwrap();
    let config = test_config(root.path());

    let egress = MockEgress::acking();
    egress.script([SendOutcome::Permanent {
        reason: otbridge_protocol::DeadLetterReason::SchemaInvalid,
        offenders: vec![],
    }]);
    let controller = PipelineController::start(&config, egress.clone()).unwrap();

    assert_eq!(controller.submit(test_record("bad_tag")), SubmitResult::Accepted);

    wait_for(
        || controller.dead_letter_metrics().entries_committed == 1,
        "record to be dead-lettered",
    )
    .await;
    assert_eq!(egress.calls(), 1);

    // Give a spurious retry every chance to happen.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(egress.calls(), 1, "permanently rejected record was retried");
    assert_eq!(controller.metrics().records_delivered, 0);

    let contents =
        std::fs::read_to_string(root.path().join("dlq").join("schema_invalid.jsonl")).unwrap();
    assert_eq!(contents.lines().count(), 1);
    let entry: serde_json::Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
    assert_eq!(entry["record"]["attempt_count"], 1);

    controller.stop(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_retry_exhaustion_dead_letters_with_max_retries_reason() {
    let root = tempfile::tempdir().unwrap();
    let mut config = test_config(root.path());
    config.egress.max_attempts = 2;

    let egress = MockEgress::always(SendOutcome::Transient("503".into()));
    let controller = PipelineController::start(&config, egress.clone()).unwrap();

    for i in 0..3 {
        assert_eq!(
            controller.submit(test_record(&format!("tag_{i}"))),
            SubmitResult::Accepted
        );
    }

    wait_for(
        || controller.dead_letter_metrics().entries_committed == 3,
        "all records to exhaust retries",
    )
    .await;
    assert_eq!(controller.metrics().records_delivered, 0);

    let contents =
        std::fs::read_to_string(root.path().join("dlq").join("max_retries.jsonl")).unwrap();
    assert_eq!(contents.lines().count(), 3);

    // Exhausted records must not come back: no further egress calls
    // beyond a possible in-flight one.
    let calls = egress.calls();
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(egress.calls() <= calls + 1);

    controller.stop(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_restart_replays_undelivered_records() {
    let root = tempfile::tempdir().unwrap();
    let mut config = test_config(root.path());
    config.queue.capacity = 8; // force most records through the spool
    config.egress.max_attempts = 100;

    {
        let egress = MockEgress::always(SendOutcome::Transient("unreachable".into()));
        let controller = PipelineController::start(&config, egress.clone()).unwrap();
        for i in 0..30 {
            assert_eq!(
                controller.submit(test_record(&format!("tag_{i}"))),
                SubmitResult::Accepted
            );
        }
        wait_for(|| egress.calls() >= 1, "a failed delivery attempt").await;
        controller.stop(Duration::from_secs(5)).await.unwrap();
        assert_eq!(egress.delivered().len(), 0);
    }

    // Second run against a healthy endpoint: every accepted record from
    // the first run must arrive, each exactly once given the clean stop.
    let egress = MockEgress::acking();
    let controller = PipelineController::start(&config, egress.clone()).unwrap();
    wait_for(
        || egress.delivered().len() >= 30,
        "replayed records delivered",
    )
    .await;

    let mut delivered = egress.delivered();
    delivered.sort_unstable();
    delivered.dedup();
    assert_eq!(delivered.len(), 30, "records lost or duplicated across restart");

    // Sequence numbering continues past the replayed records.
    assert_eq!(controller.submit(test_record("fresh")), SubmitResult::Accepted);
    wait_for(|| egress.delivered().len() >= 31, "fresh record delivered").await;
    assert!(egress.delivered().iter().max().copied().unwrap() > 30);

    controller.stop(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_spool_quota_surfaces_as_rejection() {
    let root = tempfile::tempdir().unwrap();
    let mut config = test_config(root.path());
    config.queue.capacity = 1;
    config.spool.max_segment_bytes = 400;
    config.spool.quota_bytes = 400;

    let egress = MockEgress::always(SendOutcome::Transient("down".into()));
    let controller = PipelineController::start(&config, egress).unwrap();

    let mut spool_full = 0;
    for i in 0..50 {
        if controller.submit(test_record(&format!("tag_{i}")))
            == SubmitResult::Rejected(RejectReason::SpoolFull)
        {
            spool_full += 1;
        }
    }
    assert!(spool_full > 0, "quota exhaustion never reached the caller");
    assert!(controller.metrics().records_rejected >= spool_full);
    assert!(controller.spool_metrics().appends_rejected_full > 0);

    controller.stop(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_submit_after_stop_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let controller =
        PipelineController::start(&test_config(root.path()), MockEgress::acking()).unwrap();

    controller.stop(Duration::from_secs(2)).await.unwrap();
    assert_eq!(
        controller.submit(test_record("late")),
        SubmitResult::Rejected(RejectReason::ShuttingDown)
    );
    assert!(controller.stop(Duration::from_secs(1)).await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_persists_queued_records_for_next_run() {
    let root = tempfile::tempdir().unwrap();
    let mut config = test_config(root.path());
    config.egress.max_batch_delay_ms = 5_000; // keep the worker from draining

    {
        let egress = MockEgress::always(SendOutcome::Transient("down".into()));
        let controller = PipelineController::start(&config, egress.clone()).unwrap();
        for i in 0..20 {
            assert_eq!(
                controller.submit(test_record(&format!("tag_{i}"))),
                SubmitResult::Accepted
            );
        }
        controller.stop(Duration::from_secs(5)).await.unwrap();
        assert!(egress.delivered().is_empty());
    }

    config.egress.max_batch_delay_ms = 20;
    let egress = MockEgress::acking();
    let controller = PipelineController::start(&config, egress.clone()).unwrap();
    wait_for(|| egress.delivered().len() >= 20, "queued records replayed").await;

    let mut delivered = egress.delivered();
    delivered.sort_unstable();
    delivered.dedup();
    assert!(delivered.len() >= 20);

    controller.stop(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_partial_permanent_rejection_redelivers_non_offenders() {
    let root = tempfile::tempdir().unwrap();
    let mut config = test_config(root.path());
    config.egress.max_batch_delay_ms = 500; // collect all three into one batch

    let egress = MockEgress::acking();
    egress.script([SendOutcome::Permanent {
        reason: otbridge_protocol::DeadLetterReason::PoisonPayload,
        offenders: vec![1],
    }]);
    let controller = PipelineController::start(&config, egress.clone()).unwrap();

    for i in 0..3 {
        assert_eq!(
            controller.submit(test_record(&format!("tag_{i}"))),
            SubmitResult::Accepted
        );
    }

    // Only the named offender parks; its batch-mates are re-spooled and
    // arrive on the next turn.
    wait_for(|| egress.delivered().len() == 2, "non-offenders redelivered").await;
    let mut delivered = egress.delivered();
    delivered.sort_unstable();
    assert_eq!(delivered, vec![1, 3]);
    assert_eq!(controller.dead_letter_metrics().entries_committed, 1);
    assert_eq!(controller.metrics().records_respooled, 2);

    let contents =
        std::fs::read_to_string(root.path().join("dlq").join("poison_payload.jsonl")).unwrap();
    assert_eq!(contents.lines().count(), 1);
    let entry: serde_json::Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
    assert_eq!(entry["record"]["sequence"], 2);
    assert_eq!(entry["record"]["attempt_count"], 1);

    controller.stop(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_respool_hitting_quota_dead_letters_instead_of_looping() {
    let root = tempfile::tempdir().unwrap();
    let mut config = test_config(root.path());
    config.spool.max_segment_bytes = 64;
    config.spool.quota_bytes = 64; // smaller than a single frame

    let egress = MockEgress::always(SendOutcome::Transient("503".into()));
    let controller = PipelineController::start(&config, egress.clone()).unwrap();

    for i in 0..3 {
        assert_eq!(
            controller.submit(test_record(&format!("tag_{i}"))),
            SubmitResult::Accepted
        );
    }

    // The failed batch cannot be re-spooled, so the records park under
    // max_retries rather than cycling in memory.
    wait_for(
        || controller.dead_letter_metrics().entries_committed == 3,
        "unspoolable retries to be dead-lettered",
    )
    .await;
    assert_eq!(controller.metrics().records_delivered, 0);
    assert!(!controller.health().spool_fault, "quota is not an I/O fault");

    let contents =
        std::fs::read_to_string(root.path().join("dlq").join("max_retries.jsonl")).unwrap();
    assert_eq!(contents.lines().count(), 3);
    for line in contents.lines() {
        let entry: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(entry["record"]["attempt_count"], 1);
    }

    controller.stop(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_drain_dead_letters_what_the_spool_cannot_take() {
    let root = tempfile::tempdir().unwrap();
    let mut config = test_config(root.path());
    config.egress.max_batch_size = 1; // one record per delivery
    config.spool.max_segment_bytes = 64;
    config.spool.quota_bytes = 64; // shutdown drain cannot spool anything

    let egress = MockEgress::acking();
    egress.set_delay(Duration::from_millis(500));
    let controller = PipelineController::start(&config, egress.clone()).unwrap();

    for i in 0..5 {
        assert_eq!(
            controller.submit(test_record(&format!("tag_{i}"))),
            SubmitResult::Accepted
        );
    }

    // Stop while the worker is holding the first record in a slow send;
    // the other four are still queued and must not vanish.
    wait_for(|| egress.calls() >= 1, "worker to pick up the first record").await;
    controller.stop(Duration::from_secs(5)).await.unwrap();

    assert_eq!(egress.delivered(), vec![1]);
    assert_eq!(controller.dead_letter_metrics().entries_committed, 4);

    let contents =
        std::fs::read_to_string(root.path().join("dlq").join("max_retries.jsonl")).unwrap();
    let mut parked: Vec<u64> = contents
        .lines()
        .map(|line| {
            let entry: serde_json::Value = serde_json::from_str(line).unwrap();
            entry["record"]["sequence"].as_u64().unwrap()
        })
        .collect();
    parked.sort_unstable();
    assert_eq!(parked, vec![2, 3, 4, 5]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_oversized_record_is_dead_lettered_not_delivered() {
    let root = tempfile::tempdir().unwrap();
    let egress = MockEgress::acking();
    let controller = PipelineController::start(&test_config(root.path()), egress.clone()).unwrap();

    let mut oversized = test_record("tag");
    oversized.tag_path = "t".repeat(70_000);
    assert_eq!(controller.submit(oversized), SubmitResult::Accepted);
    assert_eq!(controller.submit(test_record("ok")), SubmitResult::Accepted);

    wait_for(|| egress.delivered().len() == 1, "valid record delivered").await;
    assert_eq!(egress.delivered(), vec![2]);

    wait_for(
        || controller.dead_letter_metrics().entries_committed == 1,
        "oversized record dead-lettered",
    )
    .await;
    let contents =
        std::fs::read_to_string(root.path().join("dlq").join("schema_invalid.jsonl")).unwrap();
    assert_eq!(contents.lines().count(), 1);
    let entry: serde_json::Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
    assert_eq!(entry["record"]["sequence"], 1);

    controller.stop(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_oversized_record_on_overflow_path_parks_at_admission() {
    let root = tempfile::tempdir().unwrap();
    let mut config = test_config(root.path());
    config.queue.capacity = 1;
    config.egress.max_batch_size = 1;

    let egress = MockEgress::acking();
    egress.set_delay(Duration::from_millis(500));
    let controller = PipelineController::start(&config, egress.clone()).unwrap();

    // Record 1 is in flight, record 2 occupies the queue, so record 3
    // takes the overflow path into the spool - where it cannot be framed.
    assert_eq!(controller.submit(test_record("first")), SubmitResult::Accepted);
    wait_for(|| egress.calls() >= 1, "worker to pick up the first record").await;
    assert_eq!(controller.submit(test_record("second")), SubmitResult::Accepted);

    let mut oversized = test_record("huge");
    oversized.tag_path = "t".repeat(70_000);
    assert_eq!(controller.submit(oversized), SubmitResult::Accepted);

    // Parked immediately, without waiting for the worker.
    assert_eq!(controller.dead_letter_metrics().entries_committed, 1);
    let contents =
        std::fs::read_to_string(root.path().join("dlq").join("schema_invalid.jsonl")).unwrap();
    let entry: serde_json::Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
    assert_eq!(entry["record"]["sequence"], 3);

    // The records that did fit still arrive.
    wait_for(|| egress.delivered().len() == 2, "valid records delivered").await;
    let mut delivered = egress.delivered();
    delivered.sort_unstable();
    assert_eq!(delivered, vec![1, 2]);

    controller.stop(Duration::from_secs(2)).await.unwrap();
}
