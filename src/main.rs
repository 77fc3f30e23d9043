use anyhow::Result;
use perfwatch::*;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

use perfwatch::aggregator::Aggregator;
use perfwatch::collectors::{
    Collector, CpuCollector, DiskCollector, MemoryBandwidthCollector, MemoryCollector,
    NetworkCollector, PerfEventsCollector,
};
use perfwatch::history_repo::{HistoryRepo, MetricStore};
use perfwatch::lifecycle::Orchestrator;
use perfwatch::models::RetentionPolicy;
use perfwatch::settings::{PerfSettings, SettingsHandle};
use perfwatch::writer::{BatchWriter, BatchWriterConfig};

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;
    tracing::info!(agent = %version::agent_id(), "starting");

    let history_repo = Arc::new(
        HistoryRepo::connect(&app_config.database.path, app_config.database.max_pool_size).await?,
    );
    history_repo.init().await?;
    let retention = &app_config.retention;
    history_repo
        .seed_retention_policy(&RetentionPolicy {
            retention_days: retention.retention_days,
            archive_enabled: retention.archive_enabled,
            downsample_after_days: retention.downsample_after_days,
            downsample_interval: retention.downsample_interval.clone(),
            last_archive_run: None,
        })
        .await?;
    let store: Arc<dyn MetricStore> = history_repo.clone();

    let perf_settings = SettingsHandle::new(PerfSettings::from(&app_config.perf));
    let perf = Arc::new(PerfEventsCollector::new(
        &app_config.perf,
        perf_settings.clone(),
    ));
    let collectors: Vec<Arc<dyn Collector>> = vec![
        Arc::new(CpuCollector::default()),
        Arc::new(MemoryCollector::default()),
        Arc::new(NetworkCollector::default()),
        Arc::new(DiskCollector::default()),
        perf.clone(),
        Arc::new(MemoryBandwidthCollector::default()),
    ];
    let aggregator = Arc::new(Aggregator::new(
        collectors,
        Duration::from_secs(app_config.collection.sampling_interval_secs),
    ));
    let writer = Arc::new(BatchWriter::new(
        store.clone(),
        BatchWriterConfig::from(&app_config.writer),
    ));
    let orchestrator = Orchestrator::new(
        aggregator.clone(),
        writer.clone(),
        store.clone(),
        app_config.publishing.broadcast_capacity,
        Duration::from_secs(app_config.collection.stop_timeout_secs),
    );
    if app_config.collection.background {
        orchestrator.start_background().await;
    }

    let retention_handle = retention_worker::spawn(
        history_repo.clone(),
        retention_worker::RetentionWorkerConfig::from(&app_config.retention),
    );

    let stats_orchestrator = orchestrator.clone();
    let stats_perf = perf.clone();
    let stats_log_interval = Duration::from_secs(app_config.collection.stats_log_interval_secs);
    let stats_handle = tokio::spawn(async move {
        let mut tick = tokio::time::interval(stats_log_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tick.tick().await;
        loop {
            tick.tick().await;
            let collecting = stats_orchestrator.is_collecting().await;
            tracing::info!(
                subscribers = stats_orchestrator.subscriber_count(),
                collecting,
                ticks_total = stats_orchestrator.aggregator().ticks_total(),
                rows_saved_total = stats_orchestrator.writer().saved_rows_total(),
                flush_failures_total = stats_orchestrator.writer().flush_failures_total(),
                perf_state = %stats_perf.state(),
                perf_intervals = stats_perf.intervals_finalized(),
                "app stats"
            );
        }
    });

    #[cfg(unix)]
    let reload_handle = tokio::spawn(reload_on_sighup(perf_settings.clone()));

    let app = routes::app(orchestrator.clone(), store);
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = shutdown_signal() => {
            tracing::info!("Received shutdown signal");
        }
    }

    orchestrator.shutdown().await;
    stats_handle.abort();
    retention_handle.abort();
    #[cfg(unix)]
    reload_handle.abort();
    tracing::info!(
        rows_saved_total = writer.saved_rows_total(),
        "shutdown complete"
    );
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// SIGHUP re-reads the config file and applies the [perf] section. The perf collector
/// picks up a changed CPU list or interval on its next sample and restarts perf.
#[cfg(unix)]
async fn reload_on_sighup(settings: SettingsHandle) {
    let Ok(mut sighup) =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
    else {
        tracing::warn!("SIGHUP handler unavailable; perf settings reload disabled");
        return;
    };
    while sighup.recv().await.is_some() {
        match config::AppConfig::load() {
            Ok(cfg) => {
                settings.apply(&cfg.perf);
                tracing::info!(settings = ?settings.current(), "perf settings reloaded");
            }
            Err(e) => tracing::warn!(error = %e, "config reload failed; keeping current settings"),
        }
    }
}
