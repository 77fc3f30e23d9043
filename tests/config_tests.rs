// Config loading and validation tests

use perfwatch::config::AppConfig;
use perfwatch::writer::BatchWriterConfig;
use std::time::Duration;

const VALID_CONFIG: &str = r#"
[server]
port = 8081
host = "0.0.0.0"

[database]
path = "data/metrics.db"
max_pool_size = 4

[collection]
sampling_interval_secs = 1
stats_log_interval_secs = 60

[writer]
batch_size = 50
flush_interval_ms = 2000

[perf]
enabled = true
binary = "perf"
cpu_list = "all"
interval_ms = 1000

[retention]
retention_days = 30
downsample_after_days = 7
downsample_interval = "1h"

[publishing]
broadcast_capacity = 60
"#;

fn assert_rejected(from: &str, to: &str, field: &str) {
    let bad = VALID_CONFIG.replace(from, to);
    assert_ne!(bad, VALID_CONFIG, "replacement {from:?} did not apply");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(
        err.to_string().contains(field),
        "expected error naming {field}, got: {err}"
    );
}

#[test]
fn test_config_loads_from_str() {
    let config = AppConfig::load_from_str(VALID_CONFIG).expect("load_from_str");
    assert_eq!(config.server.port, 8081);
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.database.path, "data/metrics.db");
    assert_eq!(config.collection.sampling_interval_secs, 1);
    assert_eq!(config.writer.batch_size, 50);
    assert_eq!(config.perf.cpu_list, "all");
    assert_eq!(config.retention.downsample_interval, "1h");
    assert_eq!(config.publishing.broadcast_capacity, 60);
}

#[test]
fn test_config_defaults_when_sections_omitted() {
    let minimal = r#"
[server]
port = 8081
host = "127.0.0.1"

[database]
path = "metrics.db"
max_pool_size = 1

[collection]
sampling_interval_secs = 2

[publishing]
broadcast_capacity = 8
"#;
    let config = AppConfig::load_from_str(minimal).expect("valid");
    assert_eq!(config.collection.stop_timeout_secs, 2);
    assert!(!config.collection.background);
    assert_eq!(config.writer.batch_size, 50);
    assert_eq!(config.writer.flush_interval_ms, 2000);
    assert_eq!(config.writer.stop_timeout_ms, 5000);
    assert!(config.perf.enabled);
    assert_eq!(config.perf.binary, "perf");
    assert_eq!(config.perf.interval_ms, 1000);
    assert_eq!(config.perf.stop_timeout_ms, 2000);
    assert_eq!(config.retention.retention_days, 30);
    assert!(config.retention.archive_enabled);
    assert_eq!(config.retention.downsample_after_days, 7);
    assert_eq!(config.retention.downsample_interval, "1h");
    assert!(config.retention.vacuum_schedule.is_none());
}

#[test]
fn test_config_partial_section_keeps_other_defaults() {
    let cfg = VALID_CONFIG.replace("batch_size = 50\nflush_interval_ms = 2000\n", "batch_size = 3\n");
    let config = AppConfig::load_from_str(&cfg).expect("valid");
    assert_eq!(config.writer.batch_size, 3);
    assert_eq!(config.writer.flush_interval_ms, 2000);
}

#[test]
fn test_config_validation_rejects_invalid_port() {
    assert_rejected("port = 8081", "port = 0", "server.port");
}

#[test]
fn test_config_validation_rejects_empty_db_path() {
    assert_rejected("path = \"data/metrics.db\"", "path = \"\"", "database.path");
}

#[test]
fn test_config_validation_rejects_max_pool_size_zero() {
    assert_rejected("max_pool_size = 4", "max_pool_size = 0", "max_pool_size");
}

#[test]
fn test_config_validation_rejects_sampling_interval_zero() {
    assert_rejected(
        "sampling_interval_secs = 1",
        "sampling_interval_secs = 0",
        "collection.sampling_interval_secs",
    );
}

#[test]
fn test_config_validation_rejects_stats_log_interval_zero() {
    assert_rejected(
        "stats_log_interval_secs = 60",
        "stats_log_interval_secs = 0",
        "stats_log_interval_secs",
    );
}

#[test]
fn test_config_validation_rejects_batch_size_zero() {
    assert_rejected("batch_size = 50", "batch_size = 0", "writer.batch_size");
}

#[test]
fn test_config_validation_rejects_flush_interval_zero() {
    assert_rejected(
        "flush_interval_ms = 2000",
        "flush_interval_ms = 0",
        "writer.flush_interval_ms",
    );
}

#[test]
fn test_config_validation_rejects_writer_stop_timeout_zero() {
    assert_rejected(
        "flush_interval_ms = 2000\n",
        "flush_interval_ms = 2000\nstop_timeout_ms = 0\n",
        "writer.stop_timeout_ms",
    );
}

#[test]
fn test_writer_stop_timeout_flows_into_batch_writer_config() {
    let cfg = VALID_CONFIG.replace(
        "flush_interval_ms = 2000\n",
        "flush_interval_ms = 2000\nstop_timeout_ms = 750\n",
    );
    let config = AppConfig::load_from_str(&cfg).expect("valid");
    let writer = BatchWriterConfig::from(&config.writer);
    assert_eq!(writer.stop_timeout, Duration::from_millis(750));
    assert_eq!(writer.flush_interval, Duration::from_millis(2000));
}

#[test]
fn test_config_validation_rejects_empty_perf_binary() {
    assert_rejected("binary = \"perf\"", "binary = \"\"", "perf.binary");
}

#[test]
fn test_config_validation_rejects_short_perf_interval() {
    assert_rejected("interval_ms = 1000", "interval_ms = 50", "perf.interval_ms");
}

#[test]
fn test_config_validation_rejects_retention_days_zero() {
    assert_rejected(
        "retention_days = 30",
        "retention_days = 0",
        "retention.retention_days",
    );
}

#[test]
fn test_config_validation_rejects_downsample_after_retention() {
    assert_rejected(
        "downsample_after_days = 7",
        "downsample_after_days = 31",
        "downsample_after_days",
    );
}

#[test]
fn test_config_validation_rejects_unknown_downsample_interval() {
    assert_rejected(
        "downsample_interval = \"1h\"",
        "downsample_interval = \"2h\"",
        "retention.downsample_interval",
    );
}

#[test]
fn test_config_validation_rejects_broadcast_capacity_zero() {
    assert_rejected(
        "broadcast_capacity = 60",
        "broadcast_capacity = 0",
        "broadcast_capacity",
    );
}

#[test]
fn test_config_validation_rejects_invalid_toml() {
    let err = AppConfig::load_from_str("not valid toml [[[").unwrap_err();
    assert!(!err.to_string().is_empty());
}

#[test]
fn test_config_load_from_file_via_env() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, VALID_CONFIG).unwrap();
    unsafe { std::env::set_var("CONFIG_FILE", path.to_str().unwrap()) };
    let result = AppConfig::load();
    unsafe { std::env::remove_var("CONFIG_FILE") };
    let config = result.expect("load from CONFIG_FILE");
    assert_eq!(config.server.port, 8081);
    assert_eq!(config.database.path, "data/metrics.db");
}
