// History engine: interval resolution, recursive downsampling, primary values and
// period-over-period comparison. Store access goes through `MetricStore`.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::MetricStore;
use crate::error::{HistoryError, QueryError};
use crate::models::{Fields, MetricRow, is_known_metric_type};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DownsampleInterval {
    FiveSeconds,
    OneMinute,
    FiveMinutes,
    OneHour,
}

impl DownsampleInterval {
    pub fn label(&self) -> &'static str {
        match self {
            DownsampleInterval::FiveSeconds => "5s",
            DownsampleInterval::OneMinute => "1m",
            DownsampleInterval::FiveMinutes => "5m",
            DownsampleInterval::OneHour => "1h",
        }
    }

    pub fn seconds(&self) -> i64 {
        match self {
            DownsampleInterval::FiveSeconds => 5,
            DownsampleInterval::OneMinute => 60,
            DownsampleInterval::FiveMinutes => 300,
            DownsampleInterval::OneHour => 3600,
        }
    }

    /// Span table for "auto": <=30m -> 5s, <=6h -> 1m, <=24h -> 5m, else 1h.
    pub fn for_span(span: Duration) -> Self {
        if span <= Duration::minutes(30) {
            DownsampleInterval::FiveSeconds
        } else if span <= Duration::hours(6) {
            DownsampleInterval::OneMinute
        } else if span <= Duration::hours(24) {
            DownsampleInterval::FiveMinutes
        } else {
            DownsampleInterval::OneHour
        }
    }
}

impl fmt::Display for DownsampleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for DownsampleInterval {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "5s" => Ok(DownsampleInterval::FiveSeconds),
            "1m" => Ok(DownsampleInterval::OneMinute),
            "5m" => Ok(DownsampleInterval::FiveMinutes),
            "1h" => Ok(DownsampleInterval::OneHour),
            other => Err(QueryError::InvalidInterval(other.to_string())),
        }
    }
}

impl Serialize for DownsampleInterval {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// `None` -> raw rows; fixed label -> that interval; "auto" -> by span.
pub fn resolve_interval(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    requested: Option<&str>,
) -> Result<Option<DownsampleInterval>, QueryError> {
    match requested {
        None => Ok(None),
        Some("auto") => Ok(Some(DownsampleInterval::for_span(end - start))),
        Some(label) => label.parse().map(Some),
    }
}

/// Recursive aggregate of the values one key takes across a bucket.
///
/// Nulls are ignored. Numbers average; objects merge key-wise (a key missing from
/// some rows is aggregated over the rows that have it); equal-length numeric arrays
/// average element-wise; anything else keeps the first value.
pub fn aggregate_values(values: &[&Value]) -> Value {
    let present: Vec<&Value> = values.iter().copied().filter(|v| !v.is_null()).collect();
    let Some(first) = present.first() else {
        return Value::Null;
    };

    if present.iter().all(|v| v.is_number()) {
        let nums: Vec<f64> = present.iter().filter_map(|v| v.as_f64()).collect();
        return mean(&nums).map(Value::from).unwrap_or(Value::Null);
    }

    if present.iter().all(|v| v.is_object()) {
        let objects: Vec<&Map<String, Value>> =
            present.iter().filter_map(|v| v.as_object()).collect();
        return Value::Object(aggregate_fields(&objects));
    }

    if present.iter().all(|v| v.is_array()) {
        let arrays: Vec<&Vec<Value>> = present.iter().filter_map(|v| v.as_array()).collect();
        let len = arrays[0].len();
        let numeric = arrays
            .iter()
            .all(|a| a.len() == len && a.iter().all(Value::is_number));
        if numeric {
            let averaged: Vec<Value> = (0..len)
                .map(|i| {
                    let column: Vec<f64> = arrays.iter().filter_map(|a| a[i].as_f64()).collect();
                    mean(&column).map(Value::from).unwrap_or(Value::Null)
                })
                .collect();
            return Value::Array(averaged);
        }
    }

    (*first).clone()
}

/// Key-wise aggregate of several field maps (union of keys).
pub fn aggregate_fields(maps: &[&Fields]) -> Fields {
    let mut keys: Vec<&String> = Vec::new();
    for m in maps {
        for k in m.keys() {
            if !keys.contains(&k) {
                keys.push(k);
            }
        }
    }
    let mut out = Fields::new();
    for key in keys {
        let values: Vec<&Value> = maps.iter().filter_map(|m| m.get(key)).collect();
        out.insert(key.clone(), aggregate_values(&values));
    }
    out
}

fn mean(v: &[f64]) -> Option<f64> {
    if v.is_empty() {
        return None;
    }
    Some(v.iter().sum::<f64>() / (v.len() as f64))
}

/// Start (ms) of the bucket containing `timestamp_ms`.
pub fn bucket_start(timestamp_ms: i64, bucket_seconds: i64) -> i64 {
    let width = bucket_seconds * 1000;
    timestamp_ms.div_euclid(width) * width
}

/// One row per bucket, stamped at the bucket start, fields recursively aggregated.
/// Input order does not matter; output is ascending.
pub fn downsample(rows: &[MetricRow], bucket_seconds: i64) -> Vec<MetricRow> {
    if bucket_seconds <= 0 {
        return rows.to_vec();
    }
    let mut buckets: BTreeMap<i64, Vec<&MetricRow>> = BTreeMap::new();
    for row in rows {
        buckets
            .entry(bucket_start(row.timestamp, bucket_seconds))
            .or_default()
            .push(row);
    }
    buckets
        .into_iter()
        .map(|(start, bucket)| {
            let maps: Vec<&Fields> = bucket.iter().map(|r| &r.metric_data).collect();
            MetricRow::new(start, bucket[0].metric_type.clone(), aggregate_fields(&maps))
        })
        .collect()
}

fn number(fields: &Fields, key: &str) -> Option<f64> {
    fields.get(key).and_then(Value::as_f64)
}

/// Sum of two optional rates; either alone when only one is present.
fn sum_present(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a + b),
        (Some(v), None) | (None, Some(v)) => Some(v),
        (None, None) => None,
    }
}

/// Single scalar that stands for a metric type in comparisons.
pub fn extract_primary_value(metric_type: &str, fields: &Fields) -> Option<f64> {
    match metric_type {
        "cpu" | "memory" => number(fields, "usage_percent"),
        "network" => sum_present(
            number(fields, "bytes_sent_per_sec"),
            number(fields, "bytes_recv_per_sec"),
        ),
        "disk" => {
            let io = fields.get("io")?.as_object()?;
            sum_present(
                number(io, "read_bytes_per_sec"),
                number(io, "write_bytes_per_sec"),
            )
        }
        "perf_events" => fields
            .get("events")?
            .get("cpu-clock")?
            .get("value")?
            .as_f64(),
        "memory_bandwidth" => number(fields, "page_io_bytes_per_sec"),
        _ => None,
    }
}

/// Mean primary value over rows that have one.
pub fn average_primary(metric_type: &str, rows: &[MetricRow]) -> Option<f64> {
    let values: Vec<f64> = rows
        .iter()
        .filter_map(|r| extract_primary_value(metric_type, &r.metric_data))
        .collect();
    mean(&values)
}

/// Percent change from `comparison` to `current`. None when either side is missing
/// or the baseline is zero.
pub fn calculate_change_percent(current: Option<f64>, comparison: Option<f64>) -> Option<f64> {
    let current = current?;
    let comparison = comparison?;
    if comparison == 0.0 {
        return None;
    }
    Some((current - comparison) / comparison * 100.0)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonSummary {
    pub current_avg: Option<f64>,
    pub comparison_avg: Option<f64>,
    pub change_percent: Option<f64>,
}

pub fn compare(
    metric_type: &str,
    current: &[MetricRow],
    baseline: &[MetricRow],
) -> ComparisonSummary {
    let current_avg = average_primary(metric_type, current);
    let comparison_avg = average_primary(metric_type, baseline);
    ComparisonSummary {
        current_avg,
        comparison_avg,
        change_percent: calculate_change_percent(current_avg, comparison_avg),
    }
}

/// Baseline offset for `compare_history`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareShift {
    Yesterday,
    LastWeek,
}

impl CompareShift {
    pub fn offset(&self) -> Duration {
        match self {
            CompareShift::Yesterday => Duration::days(1),
            CompareShift::LastWeek => Duration::weeks(1),
        }
    }
}

impl FromStr for CompareShift {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yesterday" => Ok(CompareShift::Yesterday),
            "last_week" => Ok(CompareShift::LastWeek),
            other => Err(QueryError::InvalidCompareTo(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryResult {
    pub metric_type: String,
    pub interval: Option<DownsampleInterval>,
    pub rows: Vec<MetricRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonResult {
    pub metric_type: String,
    pub interval: Option<DownsampleInterval>,
    pub current: Vec<MetricRow>,
    pub baseline: Vec<MetricRow>,
    pub summary: ComparisonSummary,
}

fn validate(
    metric_type: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<(), QueryError> {
    if !is_known_metric_type(metric_type) {
        return Err(QueryError::InvalidMetricType(metric_type.to_string()));
    }
    if start > end {
        return Err(QueryError::InvalidRange);
    }
    Ok(())
}

async fn load(
    store: &dyn MetricStore,
    metric_type: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    interval: Option<DownsampleInterval>,
) -> anyhow::Result<Vec<MetricRow>> {
    let rows = store
        .query_range(metric_type, start.timestamp_millis(), end.timestamp_millis())
        .await?;
    Ok(match interval {
        Some(i) => downsample(&rows, i.seconds()),
        None => rows,
    })
}

/// Rows of one type in [start, end], optionally downsampled, then cut to `limit`.
pub async fn query_history(
    store: &dyn MetricStore,
    metric_type: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    limit: usize,
    interval: Option<&str>,
) -> Result<HistoryResult, HistoryError> {
    validate(metric_type, start, end)?;
    let interval = resolve_interval(start, end, interval)?;
    let mut rows = load(store, metric_type, start, end, interval).await?;
    rows.truncate(limit);
    Ok(HistoryResult {
        metric_type: metric_type.to_string(),
        interval,
        rows,
    })
}

/// Compare [start, end] against the same window shifted back by a day or a week.
pub async fn compare_history(
    store: &dyn MetricStore,
    metric_type: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    shift: CompareShift,
    interval: Option<&str>,
) -> Result<ComparisonResult, HistoryError> {
    let offset = shift.offset();
    compare_custom_range(
        store,
        metric_type,
        (start, end),
        (start - offset, end - offset),
        interval,
    )
    .await
}

/// Compare two arbitrary windows. "auto" resolves against the current window and the
/// same interval is applied to both.
pub async fn compare_custom_range(
    store: &dyn MetricStore,
    metric_type: &str,
    current: (DateTime<Utc>, DateTime<Utc>),
    baseline: (DateTime<Utc>, DateTime<Utc>),
    interval: Option<&str>,
) -> Result<ComparisonResult, HistoryError> {
    validate(metric_type, current.0, current.1)?;
    validate(metric_type, baseline.0, baseline.1)?;
    let interval = resolve_interval(current.0, current.1, interval)?;

    let current_rows = load(store, metric_type, current.0, current.1, interval).await?;
    let baseline_rows = load(store, metric_type, baseline.0, baseline.1, interval).await?;
    let summary = compare(metric_type, &current_rows, &baseline_rows);

    Ok(ComparisonResult {
        metric_type: metric_type.to_string(),
        interval,
        current: current_rows,
        baseline: baseline_rows,
        summary,
    })
}
