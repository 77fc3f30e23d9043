// Collector output and per-tick merged snapshot.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};

/// One collector's output for one tick: field name -> JSON value.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Merged output of every registered collector for one tick.
/// Entries keep registration order; every collector contributes exactly one entry.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedSnapshot {
    pub timestamp: DateTime<Utc>,
    pub samples: Vec<(String, Fields)>,
}

impl AggregatedSnapshot {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            samples: Vec::new(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, fields: Fields) {
        self.samples.push((name.into(), fields));
    }

    pub fn get(&self, name: &str) -> Option<&Fields> {
        self.samples
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, fields)| fields)
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    pub fn timestamp_iso(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// `{"timestamp": "...", "<collector>": {...}, ...}`
impl Serialize for AggregatedSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.samples.len() + 1))?;
        map.serialize_entry("timestamp", &self.timestamp_iso())?;
        for (name, fields) in &self.samples {
            map.serialize_entry(name, fields)?;
        }
        map.end()
    }
}
