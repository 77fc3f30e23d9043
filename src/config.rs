use serde::Deserialize;

use crate::history_repo::aggregation::DownsampleInterval;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub collection: CollectionConfig,
    #[serde(default)]
    pub writer: WriterConfig,
    #[serde(default)]
    pub perf: PerfConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    pub publishing: PublishingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_pool_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectionConfig {
    pub sampling_interval_secs: u64,
    /// Grace period for the current tick when the aggregator is stopped; the task is aborted after it.
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
    /// Collect and persist even when no WebSocket subscriber is connected.
    #[serde(default)]
    pub background: bool,
    /// How often to log app stats (subscribers, rows saved) at INFO level.
    #[serde(default = "default_stats_log_interval_secs")]
    pub stats_log_interval_secs: u64,
}

fn default_stop_timeout_secs() -> u64 {
    2
}

fn default_stats_log_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    /// Bound on the final drain when the writer stops.
    pub stop_timeout_ms: u64,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            flush_interval_ms: 2000,
            stop_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PerfConfig {
    pub enabled: bool,
    pub binary: String,
    /// "all" or a perf CPU list such as "0-3,6".
    pub cpu_list: String,
    pub interval_ms: u64,
    /// SIGTERM -> SIGKILL escalation timeout for the perf subprocess.
    pub stop_timeout_ms: u64,
}

impl Default for PerfConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            binary: "perf".into(),
            cpu_list: "all".into(),
            interval_ms: 1000,
            stop_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub retention_days: u32,
    pub archive_enabled: bool,
    pub downsample_after_days: u32,
    pub downsample_interval: String,
    pub sweep_interval_secs: u64,
    /// Optional cron expression for VACUUM (e.g. "0 0 3 * * *" = 03:00 daily). Uses local time.
    pub vacuum_schedule: Option<String>,
    /// Run VACUUM every N seconds when vacuum_schedule is not set.
    pub vacuum_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            archive_enabled: true,
            downsample_after_days: 7,
            downsample_interval: "1h".into(),
            sweep_interval_secs: 3600,
            vacuum_schedule: None,
            vacuum_interval_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublishingConfig {
    /// Max number of live messages buffered per subscriber (slow clients may lag).
    pub broadcast_capacity: usize,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            !self.database.path.is_empty(),
            "database.path must be non-empty"
        );
        anyhow::ensure!(
            self.database.max_pool_size > 0,
            "database.max_pool_size must be > 0, got {}",
            self.database.max_pool_size
        );
        anyhow::ensure!(
            self.collection.sampling_interval_secs > 0,
            "collection.sampling_interval_secs must be > 0, got {}",
            self.collection.sampling_interval_secs
        );
        anyhow::ensure!(
            self.collection.stop_timeout_secs > 0,
            "collection.stop_timeout_secs must be > 0, got {}",
            self.collection.stop_timeout_secs
        );
        anyhow::ensure!(
            self.collection.stats_log_interval_secs > 0,
            "collection.stats_log_interval_secs must be > 0, got {}",
            self.collection.stats_log_interval_secs
        );
        anyhow::ensure!(
            self.writer.batch_size > 0,
            "writer.batch_size must be > 0, got {}",
            self.writer.batch_size
        );
        anyhow::ensure!(
            self.writer.flush_interval_ms > 0,
            "writer.flush_interval_ms must be > 0, got {}",
            self.writer.flush_interval_ms
        );
        anyhow::ensure!(
            self.writer.stop_timeout_ms > 0,
            "writer.stop_timeout_ms must be > 0, got {}",
            self.writer.stop_timeout_ms
        );
        anyhow::ensure!(!self.perf.binary.is_empty(), "perf.binary must be non-empty");
        anyhow::ensure!(
            self.perf.interval_ms >= 100,
            "perf.interval_ms must be >= 100, got {}",
            self.perf.interval_ms
        );
        anyhow::ensure!(
            self.perf.stop_timeout_ms > 0,
            "perf.stop_timeout_ms must be > 0, got {}",
            self.perf.stop_timeout_ms
        );
        anyhow::ensure!(
            self.retention.retention_days > 0,
            "retention.retention_days must be > 0, got {}",
            self.retention.retention_days
        );
        anyhow::ensure!(
            self.retention.downsample_after_days <= self.retention.retention_days,
            "retention.downsample_after_days ({}) must be <= retention.retention_days ({})",
            self.retention.downsample_after_days,
            self.retention.retention_days
        );
        anyhow::ensure!(
            self.retention
                .downsample_interval
                .parse::<DownsampleInterval>()
                .is_ok(),
            "retention.downsample_interval must be one of 5s, 1m, 5m, 1h, got {:?}",
            self.retention.downsample_interval
        );
        anyhow::ensure!(
            self.retention.sweep_interval_secs > 0,
            "retention.sweep_interval_secs must be > 0, got {}",
            self.retention.sweep_interval_secs
        );
        anyhow::ensure!(
            self.retention.vacuum_interval_secs > 0,
            "retention.vacuum_interval_secs must be > 0, got {}",
            self.retention.vacuum_interval_secs
        );
        anyhow::ensure!(
            self.publishing.broadcast_capacity > 0,
            "publishing.broadcast_capacity must be > 0, got {}",
            self.publishing.broadcast_capacity
        );
        Ok(())
    }
}
