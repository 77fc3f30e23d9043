// Collector contract and the safe-sample adapter.
// safe_sample is the only failure-isolation boundary: a collector error never
// escapes it, it becomes an `_error` field on that collector's entry.

mod cpu;
mod disk;
mod memory;
mod memory_bandwidth;
mod network;
pub mod perf_events;
pub mod rate;

pub use cpu::CpuCollector;
pub use disk::DiskCollector;
pub use memory::MemoryCollector;
pub use memory_bandwidth::MemoryBandwidthCollector;
pub use network::NetworkCollector;
pub use perf_events::{PerfEventsCollector, PerfState};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::Value;

use crate::error::CollectionError;
use crate::models::Fields;

/// A unit producing one named field map per tick for one metric domain.
#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &str;

    /// Administratively disabled collectors are skipped by `safe_sample`.
    fn is_enabled(&self) -> bool {
        true
    }

    async fn sample(&self) -> Result<Fields, CollectionError>;

    /// Release background resources (subprocesses, tasks). Default: nothing to release.
    async fn close(&self) {}
}

/// Run one collector and always return a field map.
///
/// - disabled: `{_enabled: false, _timestamp}` without calling `sample`
/// - success: the fields plus `_timestamp` and `_error: null`
/// - failure: `{_error: "<message>", _timestamp}`
pub async fn safe_sample(collector: &dyn Collector) -> Fields {
    let timestamp = Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true));

    if !collector.is_enabled() {
        let mut out = Fields::new();
        out.insert("_enabled".into(), Value::Bool(false));
        out.insert("_timestamp".into(), timestamp);
        return out;
    }

    match collector.sample().await {
        Ok(mut fields) => {
            fields.insert("_timestamp".into(), timestamp);
            fields.insert("_error".into(), Value::Null);
            fields
        }
        Err(e) => {
            tracing::warn!(collector = collector.name(), error = %e, "collector failed");
            let mut out = Fields::new();
            out.insert("_error".into(), Value::String(e.to_string()));
            out.insert("_timestamp".into(), timestamp);
            out
        }
    }
}
