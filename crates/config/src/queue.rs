//! Admission queue configuration

use serde::Deserialize;

/// Default in-memory queue capacity (records)
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// In-memory admission queue settings
///
/// # Example
///
/// ```toml
/// [queue]
/// capacity = 10000
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum records held in memory between producers and the egress
    /// worker. Admission beyond this overflows to the spool.
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}
