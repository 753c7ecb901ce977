//! Segment files
//!
//! One physical file per segment, named `spool-{id:010}.seg`, holding
//! framed records in append order. The newest segment is open for
//! appending; older segments are sealed and read-only.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use otbridge_protocol::{decode_record, ProtocolError};

use crate::{Result, SpoolError};

const SEGMENT_PREFIX: &str = "spool-";
const SEGMENT_SUFFIX: &str = ".seg";

/// Path of the segment file with the given id
pub fn segment_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{SEGMENT_PREFIX}{id:010}{SEGMENT_SUFFIX}"))
}

/// Extract the segment id from a file name, if it is a segment file
pub fn parse_segment_id(name: &str) -> Option<u64> {
    name.strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_SUFFIX)?
        .parse()
        .ok()
}

/// List segment ids present in a directory, ascending
pub fn list_segment_ids(dir: &Path) -> Result<Vec<u64>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir).map_err(SpoolError::io)? {
        let entry = entry.map_err(SpoolError::io)?;
        if let Some(id) = entry.file_name().to_str().and_then(parse_segment_id) {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// Result of scanning a segment for recovery
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentScan {
    /// Byte length of the valid frame prefix
    pub valid_len: u64,

    /// Whole frames found
    pub records: u64,

    /// Whole frames starting at or past the `mark` offset (the
    /// unacknowledged suffix when `mark` is the checkpoint offset)
    pub records_after_mark: u64,

    /// Highest sequence observed in any frame
    pub max_sequence: u64,

    /// True if a torn tail frame was found past `valid_len`
    pub torn_tail: bool,
}

/// Scan a segment, counting whole frames and detecting a torn tail
pub fn scan_segment(path: &Path, mark: u64) -> Result<SegmentScan> {
    let file = File::open(path).map_err(SpoolError::io)?;
    let mut reader = BufReader::with_capacity(32 * 1024, file);

    let mut scan = SegmentScan::default();
    let mut offset = 0u64;

    loop {
        match decode_record(&mut reader) {
            Ok(Some(record)) => {
                let frame_start = offset;
                let frame_len = otbridge_protocol::encoded_len(&record) as u64;
                offset += frame_len;
                scan.valid_len = offset;
                scan.records += 1;
                if frame_start >= mark {
                    scan.records_after_mark += 1;
                }
                scan.max_sequence = scan.max_sequence.max(record.sequence);
            }
            Ok(None) => break,
            Err(ProtocolError::Truncated(_)) => {
                scan.torn_tail = true;
                break;
            }
            Err(e) => {
                return Err(SpoolError::Corrupt {
                    segment: path.display().to_string(),
                    source: e,
                });
            }
        }
    }

    Ok(scan)
}

/// Truncate a segment back to its valid frame prefix
pub fn truncate_segment(path: &Path, valid_len: u64) -> Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(SpoolError::io)?;
    file.set_len(valid_len).map_err(SpoolError::io)?;
    Ok(())
}

/// Append side of the newest segment
///
/// Whole frames only: `append` writes and flushes the complete frame
/// before returning, so a reader never observes a partial frame from a
/// live process (torn frames can only come from a crash).
pub struct SegmentWriter {
    id: u64,
    writer: BufWriter<File>,
    bytes: u64,
    records: u64,
}

impl SegmentWriter {
    /// Create a fresh segment
    pub fn create(dir: &Path, id: u64) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(segment_path(dir, id))?;
        Ok(Self {
            id,
            writer: BufWriter::with_capacity(64 * 1024, file),
            bytes: 0,
            records: 0,
        })
    }

    /// Reopen an existing segment for appending (recovery path)
    pub fn reopen(dir: &Path, id: u64, bytes: u64, records: u64) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .append(true)
            .open(segment_path(dir, id))?;
        Ok(Self {
            id,
            writer: BufWriter::with_capacity(64 * 1024, file),
            bytes,
            records,
        })
    }

    /// Append one encoded frame and flush it
    pub fn append(&mut self, frame: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(frame)?;
        self.writer.flush()?;
        self.bytes += frame.len() as u64;
        self.records += 1;
        Ok(())
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    #[inline]
    pub fn records(&self) -> u64 {
        self.records
    }
}

impl std::fmt::Debug for SegmentWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentWriter")
            .field("id", &self.id)
            .field("bytes", &self.bytes)
            .field("records", &self.records)
            .finish()
    }
}
