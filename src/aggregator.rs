// Concurrent fan-out over all registered collectors, one snapshot per tick.

use chrono::Utc;
use futures_util::future::join_all;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Notify;
use tokio::time::{Duration, MissedTickBehavior, interval};

use crate::collectors::{Collector, safe_sample};
use crate::models::AggregatedSnapshot;

pub struct Aggregator {
    collectors: RwLock<Vec<Arc<dyn Collector>>>,
    interval: Duration,
    running: AtomicBool,
    stop_requested: AtomicBool,
    wake: Notify,
    ticks_total: AtomicU64,
}

/// Clears the stop request, then the running flag, however the loop exits
/// (return, panic, task abort).
struct RunningGuard<'a> {
    running: &'a AtomicBool,
    stop_requested: &'a AtomicBool,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.stop_requested.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Aggregator {
    pub fn new(collectors: Vec<Arc<dyn Collector>>, interval: Duration) -> Self {
        Self {
            collectors: RwLock::new(collectors),
            interval,
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            wake: Notify::new(),
            ticks_total: AtomicU64::new(0),
        }
    }

    fn snapshot_collectors(&self) -> Vec<Arc<dyn Collector>> {
        match self.collectors.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn add_collector(&self, collector: Arc<dyn Collector>) {
        match self.collectors.write() {
            Ok(mut guard) => guard.push(collector),
            Err(poisoned) => poisoned.into_inner().push(collector),
        }
    }

    /// Returns false when no collector has that name.
    pub fn remove_collector(&self, name: &str) -> bool {
        let mut guard = match self.collectors.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = guard.len();
        guard.retain(|c| c.name() != name);
        guard.len() != before
    }

    pub fn collector_names(&self) -> Vec<String> {
        self.snapshot_collectors()
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn ticks_total(&self) -> u64 {
        self.ticks_total.load(Ordering::Relaxed)
    }

    /// Sample every collector concurrently and wait for all of them.
    /// Entries come back in registration order, one per collector.
    pub async fn collect_all(&self) -> AggregatedSnapshot {
        let collectors = self.snapshot_collectors();
        let mut snapshot = AggregatedSnapshot::new(Utc::now());
        let results = join_all(collectors.iter().map(|c| safe_sample(c.as_ref()))).await;
        for (collector, fields) in collectors.iter().zip(results) {
            snapshot.insert(collector.name(), fields);
        }
        snapshot
    }

    /// Tick loop: collect, hand the snapshot to `callback`, wait for the next tick.
    /// Returns once `stop()` is observed at the top of an iteration, including a
    /// stop issued before the loop first ran. A second concurrent call returns
    /// immediately.
    pub async fn start<F, Fut>(&self, mut callback: F)
    where
        F: FnMut(AggregatedSnapshot) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!(operation = "aggregator_start", "aggregator already running");
            return;
        }
        let _running = RunningGuard {
            running: &self.running,
            stop_requested: &self.stop_requested,
        };

        let mut tick = interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::debug!(
            interval_ms = self.interval.as_millis() as u64,
            collectors = ?self.collector_names(),
            "aggregator started"
        );

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = self.wake.notified() => {}
            }
            if self.stop_requested.load(Ordering::SeqCst) {
                break;
            }

            let snapshot = self.collect_all().await;
            self.ticks_total.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = callback(snapshot).await {
                tracing::warn!(
                    error = %e,
                    operation = "aggregator_callback",
                    "snapshot callback failed"
                );
            }
        }
        tracing::debug!("aggregator stopped");
    }

    /// Cooperative: the loop finishes its current callback before exiting.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub async fn close_all(&self) {
        for collector in self.snapshot_collectors() {
            collector.close().await;
        }
    }
}
