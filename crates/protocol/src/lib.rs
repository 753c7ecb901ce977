//! OT Bridge Protocol - Core record types for the ingestion pipeline
//!
//! This crate provides the foundational types that flow through the pipeline:
//! - `Record` - canonical time-series reading with admission metadata
//! - `Value` - closed tagged union of sensor value kinds
//! - `Quality` - source-reported quality, never upgraded by the pipeline
//! - `SourceId` - protocol adapter identification
//! - `DeadLetterReason` - closed classification for terminal failures
//!
//! It also defines the length-prefixed binary frame codec used by the
//! disk spool, built so that a torn tail frame (process killed mid-write)
//! is indistinguishable from end-of-file and never corrupts earlier frames.
//!
//! # Design Principles
//!
//! - **Closed variants**: value kinds and failure reasons are enums, not
//!   open-ended strings
//! - **Immutable after admission**: once a `Record` has a sequence, only
//!   `attempt_count` may change

mod codec;
mod error;
mod record;
mod source;

pub use codec::{
    decode_record, encode_record, encoded_len, frame_fits, MAX_FRAME_BYTES,
    MAX_STRING_FIELD_BYTES,
};
pub use error::ProtocolError;
pub use record::{DeadLetterReason, Quality, Record, Value};
pub use source::SourceId;

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
