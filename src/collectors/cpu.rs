// CPU usage via sysinfo.

use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};
use sysinfo::System;
use tracing::instrument;

use super::Collector;
use crate::error::CollectionError;
use crate::models::Fields;

pub struct CpuCollector {
    enabled: bool,
    sys: Arc<Mutex<System>>,
}

impl Default for CpuCollector {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CpuCollector {
    pub fn new(enabled: bool) -> Self {
        let mut sys = System::new();
        // Baseline so the first real sample has a delta to work with.
        sys.refresh_cpu_all();
        Self {
            enabled,
            sys: Arc::new(Mutex::new(sys)),
        }
    }
}

#[async_trait]
impl Collector for CpuCollector {
    fn name(&self) -> &str {
        "cpu"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[instrument(skip(self), fields(collector = "cpu", operation = "sample"))]
    async fn sample(&self) -> Result<Fields, CollectionError> {
        let sys = self.sys.clone();
        tokio::task::spawn_blocking(move || {
            let mut sys = sys
                .lock()
                .map_err(|e| CollectionError::failed("cpu", format!("sysinfo lock poisoned: {e}")))?;
            sys.refresh_cpu_all();

            let usage = (sys.global_cpu_usage() as f64).clamp(0.0, 100.0);
            let per_core: Vec<f64> = sys
                .cpus()
                .iter()
                .map(|c| (c.cpu_usage() as f64).clamp(0.0, 100.0))
                .collect();
            let frequency_mhz = sys.cpus().first().map(|c| c.frequency()).unwrap_or(0);
            let load = System::load_average();

            let mut out = Fields::new();
            out.insert("usage_percent".into(), json!(usage));
            out.insert("per_core".into(), json!(per_core));
            out.insert("core_count".into(), json!(sys.cpus().len()));
            out.insert("frequency_mhz".into(), json!(frequency_mhz));
            out.insert(
                "load_avg".into(),
                json!({ "one": load.one, "five": load.five, "fifteen": load.fifteen }),
            );
            Ok(out)
        })
        .await?
    }
}
