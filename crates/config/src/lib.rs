//! OT Bridge Configuration
//!
//! TOML-based configuration loading with sensible defaults.
//! Minimal config should just work - only specify what you need to change.
//!
//! # Parsing
//!
//! Use the `FromStr` trait to parse configuration:
//!
//! ```
//! use otbridge_config::Config;
//! use std::str::FromStr;
//!
//! let config = Config::from_str("[spool]\ndir = \"/var/lib/otbridge/spool\"").unwrap();
//! ```
//!
//! # Example Minimal Config
//!
//! ```toml
//! [spool]
//! dir = "/var/lib/otbridge/spool"
//!
//! [dead_letter]
//! dir = "/var/lib/otbridge/dlq"
//! ```
//!
//! Every threshold (queue capacity, segment size, quota, batch bounds,
//! breaker thresholds, retry caps) has a default matching the documented
//! deployment values.

mod egress;
mod error;
mod logging;
mod queue;
mod spool;
mod validation;

use std::fs;
use std::path::Path;
use std::str::FromStr;

pub use egress::{BreakerConfig, EgressConfig};
pub use error::{ConfigError, Result};
pub use logging::{LogConfig, LogFormat, LogLevel};
pub use queue::QueueConfig;
pub use spool::{DeadLetterConfig, SpoolConfig};

use serde::Deserialize;

/// Main configuration structure
///
/// All sections are optional with sensible defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,

    /// In-memory admission queue
    pub queue: QueueConfig,

    /// Disk-backed overflow spool
    pub spool: SpoolConfig,

    /// Terminal dead-letter store
    pub dead_letter: DeadLetterConfig,

    /// Batching, retry and circuit breaker settings for the egress path
    pub egress: EgressConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, contains invalid TOML,
    /// or fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod lib_test;
