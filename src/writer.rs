// Batched write-behind persistence queue.
// One worker task owns the pending buffer; it flushes when the buffer reaches
// batch_size, when a wait for the next entry times out, and once more on stop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, timeout};

use crate::config::WriterConfig;
use crate::history_repo::MetricStore;
use crate::models::{AggregatedSnapshot, Fields, MetricRow, is_known_metric_type};

/// Queue depth before `enqueue` starts applying backpressure.
const QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct BatchWriterConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
    /// Bound on the final drain when stopping.
    pub stop_timeout: Duration,
}

impl From<&WriterConfig> for BatchWriterConfig {
    fn from(c: &WriterConfig) -> Self {
        Self {
            batch_size: c.batch_size,
            flush_interval: Duration::from_millis(c.flush_interval_ms),
            stop_timeout: Duration::from_millis(c.stop_timeout_ms),
        }
    }
}

/// One snapshot worth of rows.
#[derive(Debug, Clone)]
pub struct WriteEntry {
    pub timestamp: i64,
    pub metrics: Vec<(String, Fields)>,
}

impl WriteEntry {
    /// Keeps only the persisted metric types. None when nothing is left.
    pub fn from_snapshot(snapshot: &AggregatedSnapshot) -> Option<Self> {
        let metrics: Vec<(String, Fields)> = snapshot
            .samples
            .iter()
            .filter(|(name, _)| is_known_metric_type(name))
            .cloned()
            .collect();
        if metrics.is_empty() {
            return None;
        }
        Some(Self {
            timestamp: snapshot.timestamp_ms(),
            metrics,
        })
    }

    fn into_rows(self) -> impl Iterator<Item = MetricRow> {
        let timestamp = self.timestamp;
        self.metrics
            .into_iter()
            .map(move |(metric_type, fields)| MetricRow::new(timestamp, metric_type, fields))
    }
}

enum WriterMsg {
    Entry(WriteEntry),
    Stop,
}

struct Worker {
    tx: mpsc::Sender<WriterMsg>,
    handle: JoinHandle<()>,
}

pub struct BatchWriter {
    store: Arc<dyn MetricStore>,
    config: BatchWriterConfig,
    worker: Mutex<Option<Worker>>,
    running: AtomicBool,
    saved_rows_total: Arc<AtomicU64>,
    flush_failures_total: Arc<AtomicU64>,
}

impl BatchWriter {
    pub fn new(store: Arc<dyn MetricStore>, config: BatchWriterConfig) -> Self {
        Self {
            store,
            config,
            worker: Mutex::new(None),
            running: AtomicBool::new(false),
            saved_rows_total: Arc::new(AtomicU64::new(0)),
            flush_failures_total: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn saved_rows_total(&self) -> u64 {
        self.saved_rows_total.load(Ordering::Relaxed)
    }

    pub fn flush_failures_total(&self) -> u64 {
        self.flush_failures_total.load(Ordering::Relaxed)
    }

    fn lock_worker(&self) -> std::sync::MutexGuard<'_, Option<Worker>> {
        self.worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn the worker on the current runtime. No-op if already running.
    pub fn start(&self) {
        let mut slot = self.lock_worker();
        if slot.is_some() {
            return;
        }
        let Ok(owner) = Handle::try_current() else {
            tracing::warn!(operation = "writer_start", "no tokio runtime; writer not started");
            return;
        };
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let handle = owner.spawn(run_worker(
            rx,
            self.store.clone(),
            self.config.clone(),
            self.saved_rows_total.clone(),
            self.flush_failures_total.clone(),
        ));
        *slot = Some(Worker { tx, handle });
        self.running.store(true, Ordering::SeqCst);
        tracing::debug!(
            batch_size = self.config.batch_size,
            flush_interval_ms = self.config.flush_interval.as_millis() as u64,
            "batch writer started"
        );
    }

    /// Queue one snapshot. Dropped silently when the writer is not running.
    pub async fn enqueue(&self, snapshot: &AggregatedSnapshot) {
        if !self.is_running() {
            return;
        }
        let Some(entry) = WriteEntry::from_snapshot(snapshot) else {
            return;
        };
        let tx = match self.lock_worker().as_ref() {
            Some(w) => w.tx.clone(),
            None => return,
        };
        if tx.send(WriterMsg::Entry(entry)).await.is_err() {
            tracing::debug!("batch writer channel closed; entry dropped");
        }
    }

    /// Send the stop marker and wait for the final flush.
    ///
    /// Called with no runtime, or after the owning runtime is gone, this only marks
    /// the writer stopped: the worker is assumed torn down.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let Some(worker) = self.lock_worker().take() else {
            return;
        };

        // A worker whose runtime was shut down reports finished (its task was dropped).
        if Handle::try_current().is_err() || worker.handle.is_finished() {
            tracing::debug!(
                operation = "writer_stop",
                "writer not driven from its runtime or already finished; skipping drain"
            );
            return;
        }

        let Worker { tx, mut handle } = worker;
        if tx.send(WriterMsg::Stop).await.is_err() {
            tracing::debug!("batch writer already exited");
        }
        drop(tx);
        match timeout(self.config.stop_timeout, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "batch writer task failed"),
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.config.stop_timeout.as_millis() as u64,
                    "batch writer did not drain in time; aborting"
                );
                handle.abort();
            }
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<WriterMsg>,
    store: Arc<dyn MetricStore>,
    config: BatchWriterConfig,
    saved_rows_total: Arc<AtomicU64>,
    flush_failures_total: Arc<AtomicU64>,
) {
    let mut pending: Vec<WriteEntry> = Vec::new();

    loop {
        match timeout(config.flush_interval, rx.recv()).await {
            Ok(Some(WriterMsg::Entry(entry))) => {
                pending.push(entry);
                if pending.len() >= config.batch_size {
                    flush(&*store, &mut pending, &saved_rows_total, &flush_failures_total).await;
                }
            }
            Ok(Some(WriterMsg::Stop)) | Ok(None) => break,
            Err(_) => {
                if !pending.is_empty() {
                    flush(&*store, &mut pending, &saved_rows_total, &flush_failures_total).await;
                }
            }
        }
    }
    flush(&*store, &mut pending, &saved_rows_total, &flush_failures_total).await;
    tracing::debug!("batch writer shutting down");
}

/// Write the buffer in one append. On failure the batch is logged and dropped.
async fn flush(
    store: &dyn MetricStore,
    pending: &mut Vec<WriteEntry>,
    saved_rows_total: &AtomicU64,
    flush_failures_total: &AtomicU64,
) {
    if pending.is_empty() {
        return;
    }
    let entries = pending.len();
    let rows: Vec<MetricRow> = pending.drain(..).flat_map(WriteEntry::into_rows).collect();
    match store.append_rows(&rows).await {
        Ok(()) => {
            saved_rows_total.fetch_add(rows.len() as u64, Ordering::Relaxed);
            tracing::debug!(
                operation = "append_rows",
                entries,
                rows_count = rows.len(),
                "batch flushed"
            );
        }
        Err(e) => {
            flush_failures_total.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                error = %e,
                operation = "append_rows",
                entries,
                "batch flush failed; batch dropped"
            );
        }
    }
}

/// Direct write path for when no writer is running.
pub async fn save_all_metrics(
    store: &dyn MetricStore,
    snapshot: &AggregatedSnapshot,
) -> anyhow::Result<usize> {
    let Some(entry) = WriteEntry::from_snapshot(snapshot) else {
        return Ok(0);
    };
    let rows: Vec<MetricRow> = entry.into_rows().collect();
    store.append_rows(&rows).await?;
    Ok(rows.len())
}
