//! Durable read checkpoint
//!
//! A tiny JSON file recording how far the egress worker has durably
//! consumed the spool. Written via temp file + atomic rename so a crash
//! mid-write leaves the previous checkpoint intact.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Result, SpoolError};

/// File name inside the spool directory
pub const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Durable read position: everything before this is acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Segment the read cursor is in
    pub segment_id: u64,

    /// Byte offset of the first unacknowledged frame within that segment
    pub read_offset: u64,
}

impl Checkpoint {
    /// Path of the checkpoint file within a spool directory
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(CHECKPOINT_FILE)
    }

    /// Load the checkpoint, or `None` if no checkpoint has been written yet
    pub fn load(dir: &Path) -> Result<Option<Checkpoint>> {
        let path = Self::path_in(dir);
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SpoolError::io(e)),
        };

        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| SpoolError::CheckpointCorrupt(e.to_string()))
    }

    /// Persist atomically: write a temp file, flush, rename over the target
    pub fn persist(&self, dir: &Path) -> Result<()> {
        let tmp = dir.join(format!("{CHECKPOINT_FILE}.tmp"));
        let body = serde_json::to_vec(self)
            .map_err(|e| SpoolError::CheckpointCorrupt(e.to_string()))?;

        fs::write(&tmp, body).map_err(SpoolError::io)?;
        fs::rename(&tmp, Self::path_in(dir)).map_err(SpoolError::io)?;
        Ok(())
    }
}
