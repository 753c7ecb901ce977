//! Length-prefixed binary frame codec for records
//!
//! Each record is stored as one frame:
//!
//! ```text
//! [4-byte frame length][30-byte fixed header][value payload][source_id][tag_path]
//! ```
//!
//! Fixed header layout (big-endian):
//! - `sequence`: u64
//! - `event_time_ms`: u64
//! - `ingest_time_ms`: u64
//! - `attempt_count`: u32
//! - `quality`: u8
//! - `value` tag: u8
//!
//! Value payload: 8 bytes for `Float`/`Int`, 1 byte for `Bool`, and
//! `[u32 length][bytes]` for `Text`. String fields are `[u16 length][bytes]`.
//!
//! A reader hitting EOF on the length prefix has cleanly reached the end of
//! the segment and observes `Ok(None)`. EOF anywhere inside a frame means
//! the process died mid-append; that surfaces as `Truncated`, and the spool
//! truncates the segment back to the last whole frame on recovery.

use std::io::{ErrorKind, Read};

use bytes::{BufMut, BytesMut};

use crate::{ProtocolError, Quality, Record, Result, SourceId, Value};

/// Sanity cap on a single frame; anything larger is corruption
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Largest `source_id`/`tag_path` a frame's u16 length prefix can carry
pub const MAX_STRING_FIELD_BYTES: usize = u16::MAX as usize;

const LENGTH_FIELD_SIZE: usize = 4;
const FIXED_HEADER_SIZE: usize = 8 + 8 + 8 + 4 + 1 + 1;

/// Number of bytes `encode_record` will append for this record
pub fn encoded_len(record: &Record) -> usize {
    let value_len = match &record.value {
        Value::Float(_) | Value::Int(_) => 8,
        Value::Bool(_) => 1,
        Value::Text(s) => 4 + s.len(),
    };
    LENGTH_FIELD_SIZE
        + FIXED_HEADER_SIZE
        + value_len
        + 2
        + record.source_id.as_str().len()
        + 2
        + record.tag_path.len()
}

/// True if the record's fields fit the frame format's length prefixes
///
/// A record failing this check cannot be persisted; admission-side schema
/// validation uses it so such records are dead-lettered, never half-written.
pub fn frame_fits(record: &Record) -> bool {
    record.source_id.as_str().len() <= MAX_STRING_FIELD_BYTES
        && record.tag_path.len() <= MAX_STRING_FIELD_BYTES
        && encoded_len(record) - LENGTH_FIELD_SIZE <= MAX_FRAME_BYTES
}

/// Append one framed record to the buffer
///
/// Fails without writing anything if a string field overflows its length
/// prefix or the body exceeds `MAX_FRAME_BYTES`; a truncated length prefix
/// would otherwise desynchronize every frame behind it in the segment.
pub fn encode_record(record: &Record, buf: &mut BytesMut) -> Result<()> {
    let source_len = record.source_id.as_str().len();
    if source_len > MAX_STRING_FIELD_BYTES {
        return Err(ProtocolError::FieldTooLong {
            field: "source_id",
            len: source_len,
            max: MAX_STRING_FIELD_BYTES,
        });
    }
    let tag_len = record.tag_path.len();
    if tag_len > MAX_STRING_FIELD_BYTES {
        return Err(ProtocolError::FieldTooLong {
            field: "tag_path",
            len: tag_len,
            max: MAX_STRING_FIELD_BYTES,
        });
    }
    let body_len = encoded_len(record) - LENGTH_FIELD_SIZE;
    if body_len > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge {
            got: body_len,
            max: MAX_FRAME_BYTES,
        });
    }
    buf.reserve(LENGTH_FIELD_SIZE + body_len);

    buf.put_u32(body_len as u32);
    buf.put_u64(record.sequence);
    buf.put_u64(record.event_time_ms);
    buf.put_u64(record.ingest_time_ms);
    buf.put_u32(record.attempt_count);
    buf.put_u8(record.quality.tag());
    buf.put_u8(record.value.tag());

    match &record.value {
        Value::Float(v) => buf.put_f64(*v),
        Value::Int(v) => buf.put_i64(*v),
        Value::Bool(v) => buf.put_u8(*v as u8),
        Value::Text(s) => {
            buf.put_u32(s.len() as u32);
            buf.put_slice(s.as_bytes());
        }
    }

    buf.put_u16(source_len as u16);
    buf.put_slice(record.source_id.as_str().as_bytes());
    buf.put_u16(tag_len as u16);
    buf.put_slice(record.tag_path.as_bytes());
    Ok(())
}

/// Read the next framed record
///
/// Returns `Ok(None)` on clean EOF (no bytes of a next frame present).
/// Returns `Truncated` if EOF falls inside a frame.
pub fn decode_record(reader: &mut impl Read) -> Result<Option<Record>> {
    let mut len_bytes = [0u8; LENGTH_FIELD_SIZE];
    match read_exact_or_eof(reader, &mut len_bytes)? {
        ReadOutcome::Eof => return Ok(None),
        ReadOutcome::Partial => return Err(ProtocolError::Truncated("frame length")),
        ReadOutcome::Full => {}
    }

    let body_len = u32::from_be_bytes(len_bytes) as usize;
    if body_len > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge {
            got: body_len,
            max: MAX_FRAME_BYTES,
        });
    }
    if body_len < FIXED_HEADER_SIZE {
        return Err(ProtocolError::Truncated("frame header"));
    }

    let mut body = vec![0u8; body_len];
    match read_exact_or_eof(reader, &mut body)? {
        ReadOutcome::Full => {}
        _ => return Err(ProtocolError::Truncated("frame body")),
    }

    parse_body(&body).map(Some)
}

fn parse_body(body: &[u8]) -> Result<Record> {
    let mut cur = Cursor { buf: body, pos: 0 };

    let sequence = cur.u64("sequence")?;
    let event_time_ms = cur.u64("event_time")?;
    let ingest_time_ms = cur.u64("ingest_time")?;
    let attempt_count = cur.u32("attempt_count")?;
    let quality_tag = cur.u8("quality")?;
    let value_tag = cur.u8("value tag")?;

    let quality = Quality::from_tag(quality_tag).ok_or(ProtocolError::BadQuality(quality_tag))?;

    let value = match value_tag {
        0 => Value::Float(f64::from_bits(cur.u64("float value")?)),
        1 => Value::Int(cur.u64("int value")? as i64),
        2 => {
            let len = cur.u32("text length")? as usize;
            Value::Text(cur.string(len, "text value")?)
        }
        3 => Value::Bool(cur.u8("bool value")? != 0),
        tag => return Err(ProtocolError::BadValueTag(tag)),
    };

    let source_len = cur.u16("source_id length")? as usize;
    let source_id = SourceId::new(cur.string(source_len, "source_id")?);
    let tag_len = cur.u16("tag_path length")? as usize;
    let tag_path = cur.string(tag_len, "tag_path")?;

    Ok(Record {
        source_id,
        tag_path,
        value,
        quality,
        event_time_ms,
        ingest_time_ms,
        attempt_count,
        sequence,
    })
}

enum ReadOutcome {
    Full,
    Partial,
    Eof,
}

/// Like `read_exact`, but distinguishes "no bytes at all" from a torn read
fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> Result<ReadOutcome> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Ok(if filled == 0 {
                    ReadOutcome::Eof
                } else {
                    ReadOutcome::Partial
                });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(ReadOutcome::Full)
}

/// Minimal big-endian cursor over a frame body
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(ProtocolError::Truncated(field));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self, field: &'static str) -> Result<u8> {
        Ok(self.take(1, field)?[0])
    }

    fn u16(&mut self, field: &'static str) -> Result<u16> {
        let b = self.take(2, field)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self, field: &'static str) -> Result<u32> {
        let b: [u8; 4] = self
            .take(4, field)?
            .try_into()
            .map_err(|_| ProtocolError::Truncated(field))?;
        Ok(u32::from_be_bytes(b))
    }

    fn u64(&mut self, field: &'static str) -> Result<u64> {
        let b: [u8; 8] = self
            .take(8, field)?
            .try_into()
            .map_err(|_| ProtocolError::Truncated(field))?;
        Ok(u64::from_be_bytes(b))
    }

    fn string(&mut self, len: usize, field: &'static str) -> Result<String> {
        let b = self.take(len, field)?;
        String::from_utf8(b.to_vec()).map_err(|_| ProtocolError::Utf8 { field })
    }
}
