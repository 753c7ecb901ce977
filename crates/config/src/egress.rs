//! Egress path configuration: batching, retry policy, circuit breaker

use serde::Deserialize;

/// Default records per egress batch
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Default maximum time a batch may accumulate (milliseconds)
pub const DEFAULT_BATCH_DELAY_MS: u64 = 2_000;

/// Default delivery attempts before a record is dead-lettered
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Default queue:spool drain ratio (hot path preference)
pub const DEFAULT_HOT_COLD_RATIO: u32 = 4;

/// Default consecutive failures before the breaker opens
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default base cooldown once the breaker opens (seconds)
pub const DEFAULT_BASE_COOLDOWN_SECS: u64 = 30;

/// Default cooldown cap (seconds)
pub const DEFAULT_MAX_COOLDOWN_SECS: u64 = 300;

/// Circuit breaker thresholds and cooldowns
///
/// # Example
///
/// ```toml
/// [egress.breaker]
/// failure_threshold = 5
/// base_cooldown_secs = 30
/// max_cooldown_secs = 300
/// half_open_probes = 1
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures in Closed before transitioning to Open
    pub failure_threshold: u32,

    /// Cooldown after the first open; doubles on repeated failure
    pub base_cooldown_secs: u64,

    /// Upper bound the doubling cooldown never exceeds
    pub max_cooldown_secs: u64,

    /// Concurrent trial calls permitted in HalfOpen
    pub half_open_probes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            base_cooldown_secs: DEFAULT_BASE_COOLDOWN_SECS,
            max_cooldown_secs: DEFAULT_MAX_COOLDOWN_SECS,
            half_open_probes: 1,
        }
    }
}

/// Egress worker settings
///
/// # Example
///
/// ```toml
/// [egress]
/// max_batch_size = 500
/// max_batch_delay_ms = 2000
/// max_attempts = 10
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EgressConfig {
    /// Records per batch; a batch ships when it reaches this size
    pub max_batch_size: usize,

    /// ... or when this much time has passed since the first record
    pub max_batch_delay_ms: u64,

    /// Delivery attempts before a record moves to the dead-letter sink
    pub max_attempts: u32,

    /// Weighted round-robin: this many queue-fed batches per spool-fed one
    pub hot_cold_ratio: u32,

    /// Circuit breaker guarding the egress client
    pub breaker: BreakerConfig,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_BATCH_SIZE,
            max_batch_delay_ms: DEFAULT_BATCH_DELAY_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            hot_cold_ratio: DEFAULT_HOT_COLD_RATIO,
            breaker: BreakerConfig::default(),
        }
    }
}
