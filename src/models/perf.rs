// Hardware-counter interval sample produced by the perf stat stream.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};

use super::Fields;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerfEventValue {
    pub value: Option<f64>,
    pub unit: Option<String>,
}

/// One finalized interval. `available` is true iff nothing is missing and nothing is unsupported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerfIntervalSample {
    pub time: String,
    pub events: BTreeMap<String, PerfEventValue>,
    pub missing_events: BTreeSet<String>,
    pub unsupported_events: BTreeSet<String>,
    pub available: bool,
}

impl PerfIntervalSample {
    pub fn event_value(&self, name: &str) -> Option<f64> {
        self.events.get(name).and_then(|e| e.value)
    }

    fn ratio(&self, numerator: &str, denominator: &str) -> Option<f64> {
        let n = self.event_value(numerator)?;
        let d = self.event_value(denominator)?;
        (d > 0.0).then(|| n / d)
    }

    /// Field map returned by the collector: events plus derived ratios.
    pub fn to_fields(&self, interval_ms: u64, cpus: Option<&str>) -> Fields {
        let mut out = Fields::new();
        out.insert("available".into(), Value::Bool(self.available));
        out.insert("time".into(), Value::String(self.time.clone()));
        out.insert("interval_ms".into(), json!(interval_ms));
        out.insert("cpus".into(), json!(cpus.unwrap_or("all")));
        out.insert(
            "events".into(),
            serde_json::to_value(&self.events).unwrap_or(Value::Null),
        );
        out.insert("missing_events".into(), json!(self.missing_events));
        out.insert("unsupported_events".into(), json!(self.unsupported_events));
        out.insert("ipc".into(), json!(self.ratio("instructions", "cycles")));
        out.insert(
            "branch_miss_rate".into(),
            json!(self.ratio("branch-misses", "branches")),
        );
        out.insert(
            "cache_miss_rate".into(),
            json!(self.ratio("LLC-load-misses", "LLC-loads")),
        );
        out
    }
}
