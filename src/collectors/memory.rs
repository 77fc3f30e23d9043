// RAM and swap usage via sysinfo.

use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};
use sysinfo::System;
use tracing::instrument;

use super::Collector;
use crate::error::CollectionError;
use crate::models::Fields;

pub struct MemoryCollector {
    enabled: bool,
    sys: Arc<Mutex<System>>,
}

impl Default for MemoryCollector {
    fn default() -> Self {
        Self::new(true)
    }
}

impl MemoryCollector {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            sys: Arc::new(Mutex::new(System::new())),
        }
    }
}

fn percent(part: u64, total: u64) -> f64 {
    if total > 0 {
        (part as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}

#[async_trait]
impl Collector for MemoryCollector {
    fn name(&self) -> &str {
        "memory"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[instrument(skip(self), fields(collector = "memory", operation = "sample"))]
    async fn sample(&self) -> Result<Fields, CollectionError> {
        let sys = self.sys.clone();
        tokio::task::spawn_blocking(move || {
            let mut sys = sys.lock().map_err(|e| {
                CollectionError::failed("memory", format!("sysinfo lock poisoned: {e}"))
            })?;
            sys.refresh_memory();

            let total = sys.total_memory();
            let available = sys.available_memory();
            let used = total.saturating_sub(available);
            let swap_total = sys.total_swap();
            let swap_used = sys.used_swap();

            let mut out = Fields::new();
            out.insert("total_bytes".into(), json!(total));
            out.insert("available_bytes".into(), json!(available));
            out.insert("used_bytes".into(), json!(used));
            out.insert("usage_percent".into(), json!(percent(used, total)));
            out.insert("swap_total_bytes".into(), json!(swap_total));
            out.insert("swap_used_bytes".into(), json!(swap_used));
            out.insert("swap_free_bytes".into(), json!(sys.free_swap()));
            out.insert("swap_percent".into(), json!(percent(swap_used, swap_total)));
            Ok(out)
        })
        .await?
    }
}
