// Retention policy (singleton row in archive_policy).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub retention_days: u32,
    pub archive_enabled: bool,
    /// Must be <= retention_days; checked by config validation, not here.
    pub downsample_after_days: u32,
    /// One of the downsample labels (5s, 1m, 5m, 1h).
    pub downsample_interval: String,
    pub last_archive_run: Option<DateTime<Utc>>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            retention_days: 30,
            archive_enabled: true,
            downsample_after_days: 7,
            downsample_interval: "1h".into(),
            last_archive_run: None,
        }
    }
}
