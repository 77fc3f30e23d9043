// Disk partitions and aggregate I/O throughput via sysinfo.

use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};
use sysinfo::Disks;
use tracing::instrument;

use super::Collector;
use super::rate::{RateCalculator, round2};
use crate::error::CollectionError;
use crate::models::Fields;

struct DiskState {
    disks: Disks,
    rates: RateCalculator,
}

pub struct DiskCollector {
    enabled: bool,
    state: Arc<Mutex<DiskState>>,
}

impl Default for DiskCollector {
    fn default() -> Self {
        Self::new(true)
    }
}

impl DiskCollector {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            state: Arc::new(Mutex::new(DiskState {
                disks: Disks::new_with_refreshed_list(),
                rates: RateCalculator::new(),
            })),
        }
    }
}

#[async_trait]
impl Collector for DiskCollector {
    fn name(&self) -> &str {
        "disk"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[instrument(skip(self), fields(collector = "disk", operation = "sample"))]
    async fn sample(&self) -> Result<Fields, CollectionError> {
        let state = self.state.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = state.lock().map_err(|e| {
                CollectionError::failed("disk", format!("sysinfo disks lock poisoned: {e}"))
            })?;
            let DiskState { disks, rates } = &mut *guard;
            disks.refresh(true);

            let mut total_read: u64 = 0;
            let mut total_written: u64 = 0;
            let partitions: Vec<_> = disks
                .list()
                .iter()
                .map(|d| {
                    let total = d.total_space();
                    let available = d.available_space();
                    let used = total.saturating_sub(available);
                    let usage_percent = if total > 0 {
                        (used as f64 / total as f64) * 100.0
                    } else {
                        0.0
                    };
                    let usage = d.usage();
                    total_read += usage.total_read_bytes;
                    total_written += usage.total_written_bytes;
                    json!({
                        "device": d.name().to_string_lossy(),
                        "mountpoint": d.mount_point().to_string_lossy(),
                        "fstype": d.file_system().to_string_lossy(),
                        "total_bytes": total,
                        "used_bytes": used,
                        "free_bytes": available,
                        "usage_percent": round2(usage_percent),
                    })
                })
                .collect();

            let read_rate = rates.rate("read_bytes", total_read as f64);
            let write_rate = rates.rate("write_bytes", total_written as f64);

            let mut out = Fields::new();
            out.insert("partitions".into(), json!(partitions));
            out.insert(
                "io".into(),
                json!({
                    "read_bytes_per_sec": round2(read_rate),
                    "write_bytes_per_sec": round2(write_rate),
                    "total_read_bytes": total_read,
                    "total_write_bytes": total_written,
                }),
            );
            Ok(out)
        })
        .await?
    }
}
