//! Record - the canonical unit of data flowing through the pipeline
//!
//! A `Record` is a single normalized sensor reading. Protocol adapters
//! produce them; the pipeline assigns `sequence` and `ingest_time_ms` once
//! at admission and treats everything except `attempt_count` as immutable
//! from that point on.

use serde::{Deserialize, Serialize};

use crate::SourceId;

/// Sensor value - closed tagged union
///
/// Vendor-specific representations are normalized to one of these four
/// kinds before a record enters the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// 64-bit floating point reading
    Float(f64),
    /// 64-bit signed integer reading
    Int(i64),
    /// String reading (status text, mode names)
    Text(String),
    /// Boolean reading (limit switches, run states)
    Bool(bool),
}

impl Value {
    /// Stable tag byte used by the wire codec
    #[inline]
    pub(crate) fn tag(&self) -> u8 {
        match self {
            Value::Float(_) => 0,
            Value::Int(_) => 1,
            Value::Text(_) => 2,
            Value::Bool(_) => 3,
        }
    }
}

/// Source-reported quality of a reading
///
/// Carried through verbatim; the pipeline never upgrades quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    /// Reading is trustworthy
    Good,
    /// Source could not vouch for the reading
    Uncertain,
    /// Reading is known bad (sensor fault, stale value)
    Bad,
}

impl Quality {
    #[inline]
    pub(crate) fn tag(&self) -> u8 {
        match self {
            Quality::Good => 0,
            Quality::Uncertain => 1,
            Quality::Bad => 2,
        }
    }

    #[inline]
    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Quality::Good),
            1 => Some(Quality::Uncertain),
            2 => Some(Quality::Bad),
            _ => None,
        }
    }
}

/// Why a record was routed to the dead-letter sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// Egress endpoint rejected the record's schema; retrying cannot help
    SchemaInvalid,
    /// Retry policy exhausted (`attempt_count` reached the configured cap)
    MaxRetriesExceeded,
    /// Payload repeatedly poisons delivery (malformed beyond schema checks)
    PoisonPayload,
}

impl DeadLetterReason {
    /// Short stable name, used for per-reason dead-letter files and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterReason::SchemaInvalid => "schema_invalid",
            DeadLetterReason::MaxRetriesExceeded => "max_retries",
            DeadLetterReason::PoisonPayload => "poison_payload",
        }
    }
}

impl std::fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized time-series reading plus pipeline admission metadata
///
/// Invariant: once `sequence` is assigned, every field except
/// `attempt_count` is immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Originating protocol adapter
    pub source_id: SourceId,

    /// Canonical tag path, e.g. `mining/crusher_1/motor_power`
    pub tag_path: String,

    /// The reading itself
    pub value: Value,

    /// Source-reported quality
    pub quality: Quality,

    /// Source-reported event time (Unix milliseconds)
    pub event_time_ms: u64,

    /// Set once at first admission into the pipeline (Unix milliseconds)
    pub ingest_time_ms: u64,

    /// Egress delivery attempts so far; drives DLQ routing and backoff
    pub attempt_count: u32,

    /// Monotonic admission sequence; spool/queue ordering key and
    /// dedup assist for the downstream consumer
    pub sequence: u64,
}

impl Record {
    /// Create a record as a protocol adapter would hand it to `submit`
    ///
    /// `ingest_time_ms`, `attempt_count` and `sequence` start zeroed and
    /// are assigned by the pipeline at admission.
    pub fn new(
        source_id: impl Into<SourceId>,
        tag_path: impl Into<String>,
        value: Value,
        quality: Quality,
        event_time_ms: u64,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            tag_path: tag_path.into(),
            value,
            quality,
            event_time_ms,
            ingest_time_ms: 0,
            attempt_count: 0,
            sequence: 0,
        }
    }

    /// Check the structural validity the egress schema requires
    ///
    /// Records failing this check are dead-lettered as `SchemaInvalid`
    /// without ever reaching the egress client. Besides the non-empty
    /// identity fields, the record must fit the spool frame format, or it
    /// could never be persisted for retry.
    pub fn is_schema_valid(&self) -> bool {
        !self.source_id.is_empty() && !self.tag_path.is_empty() && crate::codec::frame_fits(self)
    }
}
