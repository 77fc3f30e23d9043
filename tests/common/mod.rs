// Shared test helpers
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use perfwatch::collectors::Collector;
use perfwatch::error::CollectionError;
use perfwatch::history_repo::{HistoryRepo, MetricStore};
use perfwatch::models::{AggregatedSnapshot, Fields, MetricRow};
use serde_json::Value;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

pub fn fields(v: Value) -> Fields {
    v.as_object().cloned().expect("object literal")
}

pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
}

pub fn snapshot_with(timestamp: DateTime<Utc>, entries: &[(&str, Value)]) -> AggregatedSnapshot {
    let mut s = AggregatedSnapshot::new(timestamp);
    for (name, v) in entries {
        s.insert(*name, fields(v.clone()));
    }
    s
}

/// Collector returning fixed fields, optionally failing or sleeping first.
pub struct FixedCollector {
    pub name: String,
    pub fields: Fields,
    pub fail: bool,
    pub delay: Option<Duration>,
    pub calls: AtomicUsize,
    pub closed: AtomicBool,
}

impl FixedCollector {
    pub fn new(name: &str, v: Value) -> Self {
        Self {
            name: name.to_string(),
            fields: fields(v),
            fail: false,
            delay: None,
            calls: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(name, serde_json::json!({}))
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Collector for FixedCollector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn sample(&self) -> Result<Fields, CollectionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        if self.fail {
            return Err(CollectionError::failed(&self.name, "sensor exploded"));
        }
        Ok(self.fields.clone())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// In-memory store recording every append call.
#[derive(Default)]
pub struct MemoryStore {
    pub appends: Mutex<Vec<Vec<MetricRow>>>,
    pub fail: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<MetricRow>) -> Self {
        let store = Self::default();
        store.appends.lock().unwrap().push(rows);
        store
    }

    pub fn append_sizes(&self) -> Vec<usize> {
        self.appends.lock().unwrap().iter().map(Vec::len).collect()
    }

    pub fn all_rows(&self) -> Vec<MetricRow> {
        self.appends.lock().unwrap().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl MetricStore for MemoryStore {
    async fn append_rows(&self, rows: &[MetricRow]) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("disk full");
        }
        self.appends.lock().unwrap().push(rows.to_vec());
        Ok(())
    }

    async fn query_range(
        &self,
        metric_type: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> anyhow::Result<Vec<MetricRow>> {
        let mut rows: Vec<MetricRow> = self
            .all_rows()
            .into_iter()
            .filter(|r| r.metric_type == metric_type && r.timestamp >= start_ms && r.timestamp <= end_ms)
            .collect();
        rows.sort_by_key(|r| r.timestamp);
        Ok(rows)
    }
}

pub async fn temp_repo() -> (TempDir, HistoryRepo) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("history.db");
    let repo = HistoryRepo::connect(path.to_str().unwrap(), 2).await.unwrap();
    repo.init().await.unwrap();
    (dir, repo)
}
