use std::io::Write;
use std::str::FromStr;

use crate::{Config, ConfigError, LogLevel};

#[test]
fn empty_config_uses_defaults() {
    let config = Config::from_str("").unwrap();
    assert_eq!(config.queue.capacity, 10_000);
    assert_eq!(config.egress.max_batch_size, 500);
    assert_eq!(config.log.level, LogLevel::Info);
}

#[test]
fn full_config_parses() {
    let toml = r#"
[log]
level = "debug"
format = "json"

[queue]
capacity = 2000

[spool]
dir = "/data/spool"
max_segment_bytes = 4194304
quota_bytes = 67108864

[dead_letter]
dir = "/data/dlq"

[egress]
max_batch_size = 250
max_batch_delay_ms = 500
max_attempts = 5
hot_cold_ratio = 3

[egress.breaker]
failure_threshold = 4
base_cooldown_secs = 10
max_cooldown_secs = 120
half_open_probes = 2
"#;
    let config = Config::from_str(toml).unwrap();
    assert_eq!(config.queue.capacity, 2000);
    assert_eq!(config.spool.dir.to_str(), Some("/data/spool"));
    assert_eq!(config.egress.max_attempts, 5);
    assert_eq!(config.egress.breaker.half_open_probes, 2);
}

#[test]
fn from_file_roundtrip() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[queue]\ncapacity = 42").unwrap();

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.queue.capacity, 42);
}

#[test]
fn missing_file_is_io_error() {
    let err = Config::from_file("/nonexistent/otbridge.toml").unwrap_err();
    assert!(matches!(err, ConfigError::IoError { .. }));
    assert!(err.to_string().contains("/nonexistent/otbridge.toml"));
}

#[test]
fn malformed_toml_is_parse_error() {
    let err = Config::from_str("queue = not valid").unwrap_err();
    assert!(matches!(err, ConfigError::ParseError(_)));
}
