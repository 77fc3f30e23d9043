// Paging and swap traffic derived from /proc/vmstat counters.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::instrument;

use super::Collector;
use super::rate::{RateCalculator, round2};
use crate::error::CollectionError;
use crate::models::Fields;

const VMSTAT_KEYS: [&str; 6] = [
    "pgpgin",
    "pgpgout",
    "pswpin",
    "pswpout",
    "pgfault",
    "pgmajfault",
];

/// pgpgin/pgpgout count KiB.
const PAGE_IO_UNIT: f64 = 1024.0;
/// pswpin/pswpout count pages.
const SWAP_PAGE_SIZE: f64 = 4096.0;

/// Extract the tracked counters from /proc/vmstat content.
pub fn parse_vmstat(content: &str) -> HashMap<&'static str, u64> {
    let mut out = HashMap::new();
    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        if let Some(k) = VMSTAT_KEYS.iter().find(|k| **k == key)
            && let Ok(v) = value.parse::<u64>()
        {
            out.insert(*k, v);
        }
    }
    out
}

pub struct MemoryBandwidthCollector {
    enabled: bool,
    path: PathBuf,
    rates: Arc<Mutex<RateCalculator>>,
}

impl Default for MemoryBandwidthCollector {
    fn default() -> Self {
        Self::new(true)
    }
}

impl MemoryBandwidthCollector {
    pub fn new(enabled: bool) -> Self {
        Self::with_path(enabled, "/proc/vmstat")
    }

    /// Read counters from a different file (tests, containers with a bind-mounted proc).
    pub fn with_path(enabled: bool, path: impl Into<PathBuf>) -> Self {
        Self {
            enabled,
            path: path.into(),
            rates: Arc::new(Mutex::new(RateCalculator::new())),
        }
    }
}

#[async_trait]
impl Collector for MemoryBandwidthCollector {
    fn name(&self) -> &str {
        "memory_bandwidth"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[instrument(skip(self), fields(collector = "memory_bandwidth", operation = "sample"))]
    async fn sample(&self) -> Result<Fields, CollectionError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut out = Fields::new();
                out.insert("available".into(), json!(false));
                out.insert(
                    "error".into(),
                    json!(format!("{} not found", self.path.display())),
                );
                return Ok(out);
            }
            Err(e) => return Err(e.into()),
        };
        let counters = parse_vmstat(&content);
        if !counters.contains_key("pgpgin") || !counters.contains_key("pgpgout") {
            let mut out = Fields::new();
            out.insert("available".into(), json!(false));
            out.insert("error".into(), json!("pgpgin/pgpgout counters not exposed"));
            return Ok(out);
        }

        let mut rates = self.rates.lock().map_err(|e| {
            CollectionError::failed("memory_bandwidth", format!("rate lock poisoned: {e}"))
        })?;
        let mut per_sec = HashMap::new();
        for key in VMSTAT_KEYS {
            let value = counters.get(key).copied().unwrap_or(0) as f64;
            per_sec.insert(key, rates.rate(key, value));
        }
        drop(rates);

        let page_io = (per_sec["pgpgin"] + per_sec["pgpgout"]) * PAGE_IO_UNIT;
        let swap_io = (per_sec["pswpin"] + per_sec["pswpout"]) * SWAP_PAGE_SIZE;

        let mut out = Fields::new();
        out.insert("available".into(), json!(true));
        out.insert("page_io_bytes_per_sec".into(), json!(round2(page_io)));
        out.insert("swap_io_bytes_per_sec".into(), json!(round2(swap_io)));
        out.insert("page_faults_per_sec".into(), json!(round2(per_sec["pgfault"])));
        out.insert(
            "major_faults_per_sec".into(),
            json!(round2(per_sec["pgmajfault"])),
        );
        for key in VMSTAT_KEYS {
            out.insert(key.into(), json!(counters.get(key).copied().unwrap_or(0)));
        }
        Ok(out)
    }
}
