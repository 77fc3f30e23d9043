// Runtime collection settings shared between the config layer and the perf collector.
// The perf collector re-reads these on every sample and restarts its subprocess when
// the CPU subset or interval changes.

use std::sync::{Arc, RwLock};

use crate::config::PerfConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerfSettings {
    pub enabled: bool,
    /// Raw CPU selector as configured ("all", "", "0-3", ...).
    pub cpu_list: Option<String>,
    pub interval_ms: u64,
}

impl From<&PerfConfig> for PerfSettings {
    fn from(c: &PerfConfig) -> Self {
        Self {
            enabled: c.enabled,
            cpu_list: Some(c.cpu_list.clone()),
            interval_ms: c.interval_ms,
        }
    }
}

/// Cloneable handle to the current settings.
#[derive(Debug, Clone)]
pub struct SettingsHandle {
    inner: Arc<RwLock<PerfSettings>>,
}

impl SettingsHandle {
    pub fn new(settings: PerfSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    pub fn current(&self) -> PerfSettings {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update(&self, f: impl FnOnce(&mut PerfSettings)) {
        match self.inner.write() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Replaces every field under one write lock, so a concurrent sample never sees
    /// a mix of old and new values.
    pub fn apply(&self, config: &PerfConfig) {
        let next = PerfSettings::from(config);
        self.update(|s| *s = next);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.update(|s| s.enabled = enabled);
    }

    pub fn set_cpu_list(&self, cpu_list: Option<String>) {
        self.update(|s| s.cpu_list = cpu_list);
    }

    pub fn set_interval_ms(&self, interval_ms: u64) {
        self.update(|s| s.interval_ms = interval_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perf_config(enabled: bool, cpu_list: &str, interval_ms: u64) -> PerfConfig {
        PerfConfig {
            enabled,
            cpu_list: cpu_list.to_string(),
            interval_ms,
            ..PerfConfig::default()
        }
    }

    #[test]
    fn apply_replaces_all_fields() {
        let handle = SettingsHandle::new(PerfSettings::from(&perf_config(true, "all", 1000)));
        handle.apply(&perf_config(false, "0-3", 500));
        assert_eq!(
            handle.current(),
            PerfSettings {
                enabled: false,
                cpu_list: Some("0-3".into()),
                interval_ms: 500,
            }
        );
    }

    #[test]
    fn readers_never_see_a_half_applied_reload() {
        let old = perf_config(true, "all", 1000);
        let new = perf_config(false, "0-1", 250);
        let (old_settings, new_settings) = (PerfSettings::from(&old), PerfSettings::from(&new));
        let handle = SettingsHandle::new(old_settings.clone());

        let reader = handle.clone();
        let expected = [old_settings, new_settings];
        let observer = std::thread::spawn(move || {
            for _ in 0..10_000 {
                let seen = reader.current();
                assert!(expected.contains(&seen), "mixed settings: {seen:?}");
            }
        });
        for i in 0..10_000 {
            handle.apply(if i % 2 == 0 { &new } else { &old });
        }
        observer.join().unwrap();
    }
}
