//! Cross-field configuration validation
//!
//! Catches configurations that would make the pipeline's bounded-resource
//! invariants meaningless (a quota smaller than one segment, a breaker
//! that can never open) before anything starts.

use crate::{Config, ConfigError, Result};

/// Validate the complete configuration
pub fn validate(config: &Config) -> Result<()> {
    if config.queue.capacity == 0 {
        return Err(ConfigError::invalid_value(
            "queue",
            "capacity",
            "must be greater than zero",
        ));
    }

    if config.spool.max_segment_bytes == 0 {
        return Err(ConfigError::invalid_value(
            "spool",
            "max_segment_bytes",
            "must be greater than zero",
        ));
    }

    if config.spool.max_segment_records == 0 {
        return Err(ConfigError::invalid_value(
            "spool",
            "max_segment_records",
            "must be greater than zero",
        ));
    }

    if config.spool.quota_bytes < config.spool.max_segment_bytes {
        return Err(ConfigError::invalid_value(
            "spool",
            "quota_bytes",
            format!(
                "quota ({}) must cover at least one segment ({})",
                config.spool.quota_bytes, config.spool.max_segment_bytes
            ),
        ));
    }

    if config.egress.max_batch_size == 0 {
        return Err(ConfigError::invalid_value(
            "egress",
            "max_batch_size",
            "must be greater than zero",
        ));
    }

    if config.egress.max_attempts == 0 {
        return Err(ConfigError::invalid_value(
            "egress",
            "max_attempts",
            "must be greater than zero",
        ));
    }

    if config.egress.hot_cold_ratio == 0 {
        return Err(ConfigError::invalid_value(
            "egress",
            "hot_cold_ratio",
            "must be greater than zero",
        ));
    }

    let breaker = &config.egress.breaker;
    if breaker.failure_threshold == 0 {
        return Err(ConfigError::invalid_value(
            "egress.breaker",
            "failure_threshold",
            "must be greater than zero",
        ));
    }

    if breaker.half_open_probes == 0 {
        return Err(ConfigError::invalid_value(
            "egress.breaker",
            "half_open_probes",
            "must be greater than zero",
        ));
    }

    if breaker.max_cooldown_secs < breaker.base_cooldown_secs {
        return Err(ConfigError::invalid_value(
            "egress.breaker",
            "max_cooldown_secs",
            "must be at least base_cooldown_secs",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use crate::Config;

    #[test]
    fn test_default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_zero_queue_capacity_rejected() {
        let err = Config::from_str("[queue]\ncapacity = 0").unwrap_err();
        assert!(err.to_string().contains("queue.capacity"));
    }

    #[test]
    fn test_quota_below_segment_rejected() {
        let toml = r#"
[spool]
max_segment_bytes = 1048576
quota_bytes = 1024
"#;
        let err = Config::from_str(toml).unwrap_err();
        assert!(err.to_string().contains("quota"));
    }

    #[test]
    fn test_cooldown_inversion_rejected() {
        let toml = r#"
[egress.breaker]
base_cooldown_secs = 60
max_cooldown_secs = 10
"#;
        let err = Config::from_str(toml).unwrap_err();
        assert!(err.to_string().contains("max_cooldown_secs"));
    }

    #[test]
    fn test_zero_probes_rejected() {
        let err = Config::from_str("[egress.breaker]\nhalf_open_probes = 0").unwrap_err();
        assert!(err.to_string().contains("half_open_probes"));
    }
}
