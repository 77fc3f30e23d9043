// Live stream wire messages (server -> subscriber, subscriber -> server).

use serde::{Deserialize, Serialize};

use super::{AggregatedSnapshot, Fields};

/// Server-sent message. Serializes with a `type` tag: `{"type":"metrics",...}` / `{"type":"pong"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LiveMessage {
    Metrics { timestamp: String, data: LiveData },
    Pong,
}

/// Per-type payload of a metrics message; absent collectors serialize as null.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveData {
    pub cpu: Option<Fields>,
    pub memory: Option<Fields>,
    pub network: Option<Fields>,
    pub disk: Option<Fields>,
    pub perf_events: Option<Fields>,
    pub memory_bandwidth: Option<Fields>,
}

impl LiveMessage {
    pub fn from_snapshot(snapshot: &AggregatedSnapshot) -> Self {
        let pick = |name: &str| snapshot.get(name).cloned();
        LiveMessage::Metrics {
            timestamp: snapshot.timestamp_iso(),
            data: LiveData {
                cpu: pick("cpu"),
                memory: pick("memory"),
                network: pick("network"),
                disk: pick("disk"),
                perf_events: pick("perf_events"),
                memory_bandwidth: pick("memory_bandwidth"),
            },
        }
    }
}

/// Subscriber-sent message. Anything that is not a ping is ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Ping,
    #[serde(other)]
    Other,
}

impl ClientMessage {
    /// Parse a text frame; malformed JSON yields None.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}
