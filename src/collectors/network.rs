// Network throughput via sysinfo; rates from cumulative totals.

use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};
use sysinfo::Networks;
use tracing::instrument;

use super::Collector;
use super::rate::{RateCalculator, round2};
use crate::error::CollectionError;
use crate::models::Fields;

struct NetworkState {
    networks: Networks,
    rates: RateCalculator,
}

pub struct NetworkCollector {
    enabled: bool,
    state: Arc<Mutex<NetworkState>>,
}

impl Default for NetworkCollector {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkCollector {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            state: Arc::new(Mutex::new(NetworkState {
                networks: Networks::new_with_refreshed_list(),
                rates: RateCalculator::new(),
            })),
        }
    }
}

#[async_trait]
impl Collector for NetworkCollector {
    fn name(&self) -> &str {
        "network"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[instrument(skip(self), fields(collector = "network", operation = "sample"))]
    async fn sample(&self) -> Result<Fields, CollectionError> {
        let state = self.state.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = state.lock().map_err(|e| {
                CollectionError::failed("network", format!("sysinfo lock poisoned: {e}"))
            })?;
            let NetworkState { networks, rates } = &mut *guard;
            networks.refresh(true);

            let mut total_sent: u64 = 0;
            let mut total_recv: u64 = 0;
            let mut packets_sent: u64 = 0;
            let mut packets_recv: u64 = 0;
            let mut interfaces = Vec::new();
            let mut names: Vec<&String> = networks.list().keys().collect();
            names.sort();
            for name in names {
                if name == "lo" {
                    continue;
                }
                let Some(data) = networks.list().get(name) else {
                    continue;
                };
                total_sent += data.total_transmitted();
                total_recv += data.total_received();
                packets_sent += data.total_packets_transmitted();
                packets_recv += data.total_packets_received();
                interfaces.push(json!({
                    "name": name,
                    "bytes_sent": data.total_transmitted(),
                    "bytes_recv": data.total_received(),
                    "packets_sent": data.total_packets_transmitted(),
                    "packets_recv": data.total_packets_received(),
                    "errors_in": data.total_errors_on_received(),
                    "errors_out": data.total_errors_on_transmitted(),
                }));
            }

            let sent_rate = rates.rate("bytes_sent", total_sent as f64);
            let recv_rate = rates.rate("bytes_recv", total_recv as f64);

            let mut out = Fields::new();
            out.insert("bytes_sent_per_sec".into(), json!(round2(sent_rate)));
            out.insert("bytes_recv_per_sec".into(), json!(round2(recv_rate)));
            out.insert("total_bytes_sent".into(), json!(total_sent));
            out.insert("total_bytes_recv".into(), json!(total_recv));
            out.insert("packets_sent".into(), json!(packets_sent));
            out.insert("packets_recv".into(), json!(packets_recv));
            out.insert("interfaces".into(), json!(interfaces));
            Ok(out)
        })
        .await?
    }
}
