// Stored metric row: one per (timestamp, metric_type).

use serde::{Deserialize, Serialize};

use super::Fields;

/// Metric types that are persisted and queryable.
pub const METRIC_TYPES: [&str; 6] = [
    "cpu",
    "memory",
    "network",
    "disk",
    "perf_events",
    "memory_bandwidth",
];

pub fn is_known_metric_type(metric_type: &str) -> bool {
    METRIC_TYPES.contains(&metric_type)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    /// Unix epoch milliseconds.
    pub timestamp: i64,
    pub metric_type: String,
    pub metric_data: Fields,
}

impl MetricRow {
    pub fn new(timestamp: i64, metric_type: impl Into<String>, metric_data: Fields) -> Self {
        Self {
            timestamp,
            metric_type: metric_type.into(),
            metric_data,
        }
    }
}
