// Starts and stops background collection from the live-subscriber count and the
// background flag. All transitions go through `reconcile`, serialized by the task
// lock, so redundant start/stop requests are no-ops.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, timeout};

use crate::aggregator::Aggregator;
use crate::history_repo::MetricStore;
use crate::models::LiveMessage;
use crate::writer::{BatchWriter, save_all_metrics};

/// Rate limit for the "no receivers" log line.
const NO_RECEIVERS_LOG_INTERVAL: Duration = Duration::from_secs(60);

pub struct Orchestrator {
    aggregator: Arc<Aggregator>,
    writer: Arc<BatchWriter>,
    store: Arc<dyn MetricStore>,
    tx: broadcast::Sender<LiveMessage>,
    subscribers: AtomicUsize,
    background: AtomicBool,
    shutting_down: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
    stop_timeout: Duration,
    starts_total: AtomicU64,
    stops_total: AtomicU64,
}

impl Orchestrator {
    pub fn new(
        aggregator: Arc<Aggregator>,
        writer: Arc<BatchWriter>,
        store: Arc<dyn MetricStore>,
        broadcast_capacity: usize,
        stop_timeout: Duration,
    ) -> Arc<Self> {
        let (tx, _) = broadcast::channel(broadcast_capacity);
        Arc::new(Self {
            aggregator,
            writer,
            store,
            tx,
            subscribers: AtomicUsize::new(0),
            background: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            task: Mutex::new(None),
            stop_timeout,
            starts_total: AtomicU64::new(0),
            stops_total: AtomicU64::new(0),
        })
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    pub fn writer(&self) -> &Arc<BatchWriter> {
        &self.writer
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::SeqCst)
    }

    pub fn background(&self) -> bool {
        self.background.load(Ordering::SeqCst)
    }

    pub fn starts_total(&self) -> u64 {
        self.starts_total.load(Ordering::Relaxed)
    }

    pub fn stops_total(&self) -> u64 {
        self.stops_total.load(Ordering::Relaxed)
    }

    pub async fn is_collecting(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Register a live subscriber; starts collection on the 0 -> 1 transition.
    pub async fn subscribe(self: &Arc<Self>) -> Subscription {
        let rx = self.tx.subscribe();
        let count = self.subscribers.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(subscribers = count, "subscriber connected");
        self.reconcile().await;
        Subscription {
            rx,
            guard: SubscriberGuard {
                orchestrator: self.clone(),
                released: false,
            },
        }
    }

    async fn unsubscribe(self: &Arc<Self>) {
        let count = self
            .subscribers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .map(|prev| prev - 1)
            .unwrap_or(0);
        tracing::debug!(subscribers = count, "subscriber disconnected");
        if count == 0 {
            self.reconcile().await;
        }
    }

    /// Always-on collection independent of subscribers.
    pub async fn set_background(self: &Arc<Self>, enabled: bool) {
        self.background.store(enabled, Ordering::SeqCst);
        tracing::info!(background = enabled, "background collection flag changed");
        self.reconcile().await;
    }

    pub async fn start_background(self: &Arc<Self>) {
        self.set_background(true).await;
    }

    pub async fn stop_background(self: &Arc<Self>) {
        self.set_background(false).await;
    }

    fn wanted(&self) -> bool {
        !self.shutting_down.load(Ordering::SeqCst)
            && (self.subscribers.load(Ordering::SeqCst) > 0 || self.background.load(Ordering::SeqCst))
    }

    async fn reconcile(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        let running = task.as_ref().is_some_and(|h| !h.is_finished());
        let wanted = self.wanted();

        if wanted && !running {
            *task = Some(self.start_collection());
        } else if !wanted && running {
            if let Some(handle) = task.take() {
                self.stop_collection(handle).await;
            }
        } else if !running {
            // Loop ended on its own (panic); drop the stale handle.
            task.take();
        }
    }

    fn start_collection(&self) -> JoinHandle<()> {
        self.writer.start();
        self.starts_total.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            subscribers = self.subscriber_count(),
            background = self.background(),
            "starting collection"
        );

        let aggregator = self.aggregator.clone();
        let writer = self.writer.clone();
        let store = self.store.clone();
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let mut last_no_receivers_log: Option<Instant> = None;
            aggregator
                .start(move |snapshot| {
                    if tx.send(LiveMessage::from_snapshot(&snapshot)).is_err() {
                        let should_log = last_no_receivers_log
                            .is_none_or(|t| t.elapsed() >= NO_RECEIVERS_LOG_INTERVAL);
                        if should_log {
                            tracing::debug!(
                                operation = "broadcast_snapshot",
                                "no live subscribers; broadcast channel has no receivers"
                            );
                            last_no_receivers_log = Some(Instant::now());
                        }
                    }
                    let writer = writer.clone();
                    let store = store.clone();
                    async move {
                        if writer.is_running() {
                            writer.enqueue(&snapshot).await;
                        } else {
                            save_all_metrics(&*store, &snapshot).await?;
                        }
                        Ok::<(), anyhow::Error>(())
                    }
                })
                .await;
        })
    }

    async fn stop_collection(&self, mut handle: JoinHandle<()>) {
        tracing::info!("stopping collection");
        self.aggregator.stop();
        if timeout(self.stop_timeout, &mut handle).await.is_err() {
            tracing::warn!(
                timeout_ms = self.stop_timeout.as_millis() as u64,
                "aggregator did not finish its tick in time; cancelling"
            );
            handle.abort();
            let _ = handle.await;
        }
        self.writer.stop().await;
        self.stops_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Process shutdown: stop collection regardless of subscribers and release collectors.
    pub async fn shutdown(self: &Arc<Self>) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.reconcile().await;
        self.aggregator.close_all().await;
    }
}

/// A live subscriber: the message stream plus the registration guard.
pub struct Subscription {
    pub rx: broadcast::Receiver<LiveMessage>,
    guard: SubscriberGuard,
}

impl Subscription {
    /// Unregister and wait for any resulting stop to complete.
    pub async fn release(self) {
        self.guard.release().await;
    }
}

/// Decrements the subscriber count when released or dropped.
pub struct SubscriberGuard {
    orchestrator: Arc<Orchestrator>,
    released: bool,
}

impl SubscriberGuard {
    pub async fn release(mut self) {
        self.released = true;
        self.orchestrator.unsubscribe().await;
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let orchestrator = self.orchestrator.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { orchestrator.unsubscribe().await });
            }
            Err(_) => {
                orchestrator
                    .subscribers
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .ok();
            }
        }
    }
}
