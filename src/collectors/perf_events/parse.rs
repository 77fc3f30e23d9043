// perf stat CSV line parsing and interval assembly.
//
// `perf stat -x , -I <ms>` writes one line per event per interval:
//   time,value,unit,event,run,pct[,...]
// e.g. "1.000180750,12345,,cycles,1000000,100.00"

use std::collections::{BTreeMap, BTreeSet};

use crate::models::{PerfEventValue, PerfIntervalSample};

pub const PERF_STAT_EVENTS: [&str; 17] = [
    "cpu-clock",
    "context-switches",
    "cpu-migrations",
    "page-faults",
    "cycles",
    "instructions",
    "branches",
    "branch-misses",
    "L1-dcache-loads",
    "L1-dcache-load-misses",
    "LLC-loads",
    "LLC-load-misses",
    "L1-icache-loads",
    "dTLB-loads",
    "dTLB-load-misses",
    "iTLB-loads",
    "iTLB-load-misses",
];

const UNSUPPORTED_PLACEHOLDERS: [&str; 2] = ["<not supported>", "<not counted>"];

pub fn is_known_event(name: &str) -> bool {
    PERF_STAT_EVENTS.contains(&name)
}

/// `None`, empty, or "all" (any case) means no CPU subset.
pub fn normalize_cpu_list(cpu_list: Option<&str>) -> Option<String> {
    let s = cpu_list?.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("all") {
        None
    } else {
        Some(s.to_string())
    }
}

/// Arguments for `perf` (binary excluded).
pub fn build_perf_args(interval_ms: u64, cpu_list: Option<&str>) -> Vec<String> {
    let mut args = vec![
        "stat".to_string(),
        "-x".to_string(),
        ",".to_string(),
        "-I".to_string(),
        interval_ms.to_string(),
        "-e".to_string(),
        PERF_STAT_EVENTS.join(","),
    ];
    match cpu_list {
        Some(cpus) => {
            args.push("-C".to_string());
            args.push(cpus.to_string());
        }
        None => args.push("-a".to_string()),
    }
    args
}

#[derive(Debug, Clone, PartialEq)]
pub struct PerfLine {
    pub time: String,
    pub event: String,
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub supported: bool,
}

/// Parse one CSV line. Returns `None` for comments, short lines and unknown events.
pub fn parse_perf_stat_line(line: &str) -> Option<PerfLine> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() < 4 {
        return None;
    }
    let (time, raw_value, unit, event) = (parts[0], parts[1], parts[2], parts[3]);
    if !is_known_event(event) {
        return None;
    }

    let supported = !UNSUPPORTED_PLACEHOLDERS.contains(&raw_value);
    let value = if supported {
        raw_value.parse::<f64>().ok()
    } else {
        None
    };

    Some(PerfLine {
        time: time.to_string(),
        event: event.to_string(),
        value,
        unit: (!unit.is_empty()).then(|| unit.to_string()),
        supported,
    })
}

/// Groups parsed lines into interval samples.
///
/// The interval currently being assembled is finalized as soon as a line with a
/// different interval marker arrives, or on `finish()` at end of stream.
/// Unsupported events are remembered for the lifetime of the assembler (one run).
#[derive(Debug, Default)]
pub struct IntervalAssembler {
    current_time: Option<String>,
    current_events: BTreeMap<String, PerfEventValue>,
    unsupported: BTreeSet<String>,
    last_unparsed: Option<String>,
}

impl IntervalAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw line. Returns the previous interval if this line closed it.
    pub fn push(&mut self, raw: &str) -> Option<PerfIntervalSample> {
        let Some(line) = parse_perf_stat_line(raw) else {
            let trimmed = raw.trim();
            if !trimmed.is_empty() && !trimmed.starts_with('#') {
                self.last_unparsed = Some(trimmed.to_string());
            }
            return None;
        };

        let finalized = match &self.current_time {
            Some(t) if *t != line.time => self.finalize(),
            _ => None,
        };

        if self.current_time.is_none() {
            self.current_time = Some(line.time.clone());
        }
        if !line.supported {
            self.unsupported.insert(line.event.clone());
        }
        self.current_events.insert(
            line.event,
            PerfEventValue {
                value: line.value,
                unit: line.unit,
            },
        );
        finalized
    }

    /// End of stream: finalize whatever interval is pending.
    pub fn finish(&mut self) -> Option<PerfIntervalSample> {
        self.finalize()
    }

    /// Last non-CSV output line (perf error messages end up here).
    pub fn last_unparsed(&self) -> Option<&str> {
        self.last_unparsed.as_deref()
    }

    fn finalize(&mut self) -> Option<PerfIntervalSample> {
        let time = self.current_time.take()?;
        let mut events = std::mem::take(&mut self.current_events);

        let mut missing = BTreeSet::new();
        for name in PERF_STAT_EVENTS {
            if !events.contains_key(name) {
                missing.insert(name.to_string());
                events.insert(name.to_string(), PerfEventValue::default());
            }
        }
        let available = missing.is_empty() && self.unsupported.is_empty();

        Some(PerfIntervalSample {
            time,
            events,
            missing_events: missing,
            unsupported_events: self.unsupported.clone(),
            available,
        })
    }
}
