//! SpoolStore - segment-based, checkpointed overflow log
//!
//! Single writer (the admission path on queue overflow, plus the egress
//! worker re-spooling failed batches) and single reader (the egress
//! worker), which is why one mutex around the whole state is enough and
//! no finer synchronization is attempted.

use std::collections::{BTreeMap, VecDeque};
use std::fs::{self, File};
use std::io::{BufReader, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::Mutex;

use otbridge_protocol::{decode_record, encode_record, encoded_len, ProtocolError, Record};

use crate::checkpoint::Checkpoint;
use crate::metrics::SpoolMetrics;
use crate::segment::{self, SegmentWriter};
use crate::{Result, SpoolError};

/// Runtime configuration for a `SpoolStore`
///
/// The TOML-facing mirror of this lives in `otbridge-config`; the
/// pipeline controller converts between them at wiring time.
#[derive(Debug, Clone)]
pub struct SpoolConfig {
    /// Directory holding segment files and the checkpoint
    pub dir: PathBuf,

    /// Segment rotation threshold in bytes
    pub max_segment_bytes: u64,

    /// Segment rotation threshold in records
    pub max_segment_records: u64,

    /// Total on-disk quota; `append` returns `DiskFull` at this bound
    pub quota_bytes: u64,

    /// Bounded retries before an I/O error escalates
    pub io_retries: u32,

    /// Delay between I/O retries
    pub io_retry_delay: Duration,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("spool"),
            max_segment_bytes: 64 * 1024 * 1024,
            max_segment_records: 100_000,
            quota_bytes: 1024 * 1024 * 1024,
            io_retries: 3,
            io_retry_delay: Duration::from_millis(10),
        }
    }
}

/// Read cursor position (in-memory; the durable position is the checkpoint)
#[derive(Debug, Clone, Copy)]
struct Cursor {
    segment_id: u64,
    offset: u64,
}

struct Inner {
    /// Open segment the writer appends to
    writer: SegmentWriter,

    /// All segments on disk: id -> valid byte length
    segments: BTreeMap<u64, u64>,

    /// In-memory read position; never behind the checkpoint
    cursor: Cursor,

    /// Positions after each frame handed out by `read_next`, awaiting ack
    pending: VecDeque<(u64, Checkpoint)>,

    /// Durable read position
    checkpoint: Checkpoint,

    /// Frames appended but not yet handed to the reader
    unread: u64,

    /// Total bytes across all segments
    total_bytes: u64,

    /// Highest sequence seen in any frame (recovery seed for the
    /// controller's sequence counter)
    last_sequence: u64,
}

/// Durable, disk-backed overflow queue
///
/// See the crate docs for the on-disk layout and durability contract.
pub struct SpoolStore {
    config: SpoolConfig,
    inner: Mutex<Inner>,
    metrics: Arc<SpoolMetrics>,
}

impl SpoolStore {
    /// Open the spool, running crash recovery
    ///
    /// Scans the segment directory, truncates a torn tail frame in the
    /// newest segment, deletes segments wholly below the checkpoint, and
    /// resumes the read cursor from the checkpoint. Everything not yet
    /// acknowledged will be re-read (at-least-once).
    pub fn open(config: SpoolConfig) -> Result<Self> {
        fs::create_dir_all(&config.dir).map_err(SpoolError::io)?;

        let mut ids = segment::list_segment_ids(&config.dir)?;
        let mut checkpoint = Checkpoint::load(&config.dir)?.unwrap_or(Checkpoint {
            segment_id: ids.first().copied().unwrap_or(1),
            read_offset: 0,
        });

        // Segments wholly below the checkpoint were acknowledged before a
        // crash interrupted their deletion.
        let mut stale = 0usize;
        ids.retain(|&id| {
            if id < checkpoint.segment_id {
                let _ = fs::remove_file(segment::segment_path(&config.dir, id));
                stale += 1;
                false
            } else {
                true
            }
        });
        if stale > 0 {
            tracing::info!(segments = stale, "removed acknowledged segments left by a previous run");
        }

        // The checkpoint segment itself may have been deleted after being
        // fully consumed; resume from the next segment. With no segments
        // at all the stale offset must not carry into the fresh segment.
        if !ids.contains(&checkpoint.segment_id) {
            checkpoint = Checkpoint {
                segment_id: ids.first().copied().unwrap_or(checkpoint.segment_id),
                read_offset: 0,
            };
            checkpoint.persist(&config.dir)?;
        }

        let mut segments = BTreeMap::new();
        let mut unread = 0u64;
        let mut last_sequence = 0u64;
        let mut total_bytes = 0u64;
        let mut newest: Option<(u64, u64, u64)> = None; // (id, bytes, records)

        let newest_id = ids.last().copied();
        for &id in &ids {
            let path = segment::segment_path(&config.dir, id);
            let mark = if id == checkpoint.segment_id {
                checkpoint.read_offset
            } else {
                0
            };
            let scan = segment::scan_segment(&path, mark)?;

            if scan.torn_tail {
                if Some(id) == newest_id {
                    tracing::warn!(
                        segment = id,
                        valid_bytes = scan.valid_len,
                        "truncating torn tail frame from interrupted append"
                    );
                    segment::truncate_segment(&path, scan.valid_len)?;
                } else {
                    // A sealed segment must only end on a frame boundary.
                    return Err(SpoolError::Corrupt {
                        segment: path.display().to_string(),
                        source: ProtocolError::Truncated("sealed segment tail"),
                    });
                }
            }

            segments.insert(id, scan.valid_len);
            total_bytes += scan.valid_len;
            unread += scan.records_after_mark;
            last_sequence = last_sequence.max(scan.max_sequence);
            if Some(id) == newest_id {
                newest = Some((id, scan.valid_len, scan.records));
            }
        }

        let writer = match newest {
            Some((id, bytes, records)) => {
                SegmentWriter::reopen(&config.dir, id, bytes, records).map_err(SpoolError::io)?
            }
            None => {
                let id = checkpoint.segment_id;
                segments.insert(id, 0);
                SegmentWriter::create(&config.dir, id).map_err(SpoolError::io)?
            }
        };

        let metrics = Arc::new(SpoolMetrics::new());
        metrics.set_bytes_on_disk(total_bytes);
        metrics.set_segments(segments.len() as u64);

        if unread > 0 {
            tracing::info!(
                records = unread,
                segments = segments.len(),
                bytes = total_bytes,
                "spool recovery: unacknowledged backlog will be replayed"
            );
        }

        Ok(Self {
            config,
            inner: Mutex::new(Inner {
                writer,
                segments,
                cursor: Cursor {
                    segment_id: checkpoint.segment_id,
                    offset: checkpoint.read_offset,
                },
                pending: VecDeque::new(),
                checkpoint,
                unread,
                total_bytes,
                last_sequence,
            }),
            metrics,
        })
    }

    /// Append one record, rotating the segment when thresholds are hit
    ///
    /// Returns `Oversized` before writing anything if the record does not
    /// fit the frame format, and `DiskFull` deterministically once the
    /// quota cannot fit the frame. I/O errors are retried a bounded number
    /// of times, then escalated for the controller to latch as a health
    /// fault.
    pub fn append(&self, record: &Record) -> Result<()> {
        let mut inner = self.inner.lock();

        let frame_len = encoded_len(record) as u64;
        let mut buf = BytesMut::with_capacity(frame_len as usize);
        encode_record(record, &mut buf).map_err(SpoolError::Oversized)?;

        if inner.total_bytes + frame_len > self.config.quota_bytes {
            self.metrics.record_rejected_full();
            return Err(SpoolError::DiskFull {
                quota_bytes: self.config.quota_bytes,
            });
        }

        let needs_rotation = inner.writer.bytes() > 0
            && (inner.writer.bytes() + frame_len > self.config.max_segment_bytes
                || inner.writer.records() >= self.config.max_segment_records);
        if needs_rotation {
            let next_id = inner.writer.id() + 1;
            let writer = self.with_io_retries(|| SegmentWriter::create(&self.config.dir, next_id))?;
            tracing::debug!(
                sealed = inner.writer.id(),
                opened = next_id,
                sealed_bytes = inner.writer.bytes(),
                "rotated spool segment"
            );
            inner.writer = writer;
            inner.segments.insert(next_id, 0);
            self.metrics.set_segments(inner.segments.len() as u64);
        }

        self.with_io_retries(|| inner.writer.append(&buf))?;

        let id = inner.writer.id();
        let bytes = inner.writer.bytes();
        inner.segments.insert(id, bytes);
        inner.total_bytes += frame_len;
        inner.unread += 1;
        inner.last_sequence = inner.last_sequence.max(record.sequence);

        self.metrics.record_appended();
        self.metrics.set_bytes_on_disk(inner.total_bytes);
        Ok(())
    }

    /// Read up to `max` records from the oldest unread position
    ///
    /// The returned records stay unacknowledged (and will be replayed
    /// after a crash) until `acknowledge` covers them.
    pub fn read_next(&self, max: usize) -> Result<Vec<Record>> {
        let mut inner = self.inner.lock();
        let mut out = Vec::new();
        let pending_mark = inner.pending.len();

        while out.len() < max {
            let cursor = inner.cursor;

            // Past the end of the open segment means fully caught up.
            if cursor.segment_id == inner.writer.id() && cursor.offset >= inner.writer.bytes() {
                break;
            }

            let seg_bytes = inner.segments.get(&cursor.segment_id).copied();
            let next_segment = inner
                .segments
                .range(cursor.segment_id + 1..)
                .next()
                .map(|(&id, _)| id);

            // A missing entry means the segment was deleted after full
            // acknowledgement; an exhausted sealed segment also advances.
            let exhausted = match seg_bytes {
                None => true,
                Some(bytes) => cursor.offset >= bytes,
            };
            if exhausted {
                match next_segment {
                    Some(id) => {
                        inner.cursor = Cursor {
                            segment_id: id,
                            offset: 0,
                        };
                        continue;
                    }
                    None => break,
                }
            }
            let seg_bytes = match seg_bytes {
                Some(bytes) => bytes,
                None => break,
            };

            let path = segment::segment_path(&self.config.dir, cursor.segment_id);
            let mut reader = self.with_io_retries(|| {
                let mut file = File::open(&path)?;
                file.seek(SeekFrom::Start(cursor.offset))?;
                Ok(BufReader::with_capacity(32 * 1024, file))
            })?;

            let mut offset = cursor.offset;
            while out.len() < max && offset < seg_bytes {
                // Appends are whole-frame flushes, so any frame that fails
                // to decode before the tracked valid length is data loss,
                // not a torn tail recovery could fix. Rereading the same
                // offset would spin forever under the lock, so this
                // escalates for the worker to latch as a spool fault.
                let fault = match decode_record(&mut reader) {
                    Ok(Some(record)) => {
                        offset += encoded_len(&record) as u64;
                        inner.pending.push_back((
                            record.sequence,
                            Checkpoint {
                                segment_id: cursor.segment_id,
                                read_offset: offset,
                            },
                        ));
                        out.push(record);
                        continue;
                    }
                    Ok(None) => ProtocolError::Truncated("segment shorter than tracked length"),
                    Err(e) => e,
                };
                inner.pending.truncate(pending_mark);
                tracing::error!(
                    segment = cursor.segment_id,
                    offset,
                    error = %fault,
                    "unreadable frame inside tracked segment bytes"
                );
                return Err(SpoolError::Corrupt {
                    segment: path.display().to_string(),
                    source: fault,
                });
            }
            inner.cursor.offset = offset;
        }

        inner.unread = inner.unread.saturating_sub(out.len() as u64);
        self.metrics.records_read(out.len() as u64);
        Ok(out)
    }

    /// Durably acknowledge all read frames up to and including the frame
    /// bearing `sequence_upto`
    ///
    /// Persists the checkpoint and deletes segments that are now wholly
    /// consumed. Only after this returns may those records be considered
    /// delivered (or dead-lettered).
    pub fn acknowledge(&self, sequence_upto: u64) -> Result<()> {
        let mut inner = self.inner.lock();

        let mut acked = 0u64;
        let mut position = None;
        while let Some((seq, pos)) = inner.pending.pop_front() {
            acked += 1;
            position = Some(pos);
            if seq == sequence_upto {
                break;
            }
        }

        let Some(position) = position else {
            return Ok(());
        };

        inner.checkpoint = position;
        self.with_io_retries(|| {
            inner
                .checkpoint
                .persist(&self.config.dir)
                .map_err(|e| match e {
                    SpoolError::Io { source, .. } => source,
                    other => std::io::Error::other(other.to_string()),
                })
        })?;

        // Segments wholly below the checkpoint are done; the open segment
        // is never deleted.
        let deletable: Vec<u64> = inner
            .segments
            .range(..inner.checkpoint.segment_id)
            .map(|(&id, _)| id)
            .filter(|&id| id != inner.writer.id())
            .collect();
        for id in deletable {
            let bytes = inner.segments.remove(&id).unwrap_or(0);
            inner.total_bytes = inner.total_bytes.saturating_sub(bytes);
            if let Err(e) = fs::remove_file(segment::segment_path(&self.config.dir, id)) {
                tracing::warn!(segment = id, error = %e, "failed to delete consumed segment");
            } else {
                tracing::debug!(segment = id, bytes, "deleted consumed segment");
            }
        }

        self.metrics.records_acknowledged(acked);
        self.metrics.set_bytes_on_disk(inner.total_bytes);
        self.metrics.set_segments(inner.segments.len() as u64);
        Ok(())
    }

    /// True if unread records remain
    pub fn has_backlog(&self) -> bool {
        self.inner.lock().unread > 0
    }

    /// Unread record count
    pub fn unread(&self) -> u64 {
        self.inner.lock().unread
    }

    /// Total bytes currently on disk
    pub fn spooled_bytes(&self) -> u64 {
        self.inner.lock().total_bytes
    }

    /// Number of segment files present
    pub fn segment_count(&self) -> usize {
        self.inner.lock().segments.len()
    }

    /// Highest sequence observed in any frame (recovery seed)
    pub fn last_sequence(&self) -> u64 {
        self.inner.lock().last_sequence
    }

    /// Shared metrics handle
    pub fn metrics(&self) -> Arc<SpoolMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Run an I/O closure with the configured bounded retries
    fn with_io_retries<T>(&self, mut f: impl FnMut() -> std::io::Result<T>) -> Result<T> {
        let mut attempts = 0;
        loop {
            match f() {
                Ok(v) => return Ok(v),
                Err(source) => {
                    attempts += 1;
                    if attempts > self.config.io_retries {
                        return Err(SpoolError::Io { attempts, source });
                    }
                    self.metrics.record_io_retry();
                    tracing::debug!(attempt = attempts, error = %source, "retrying spool I/O");
                    std::thread::sleep(self.config.io_retry_delay);
                }
            }
        }
    }
}

impl std::fmt::Debug for SpoolStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SpoolStore")
            .field("dir", &self.config.dir)
            .field("segments", &inner.segments.len())
            .field("unread", &inner.unread)
            .field("total_bytes", &inner.total_bytes)
            .finish()
    }
}
