// Background retention: delete expired rows, roll old rows up into downsample buckets,
// record the run. Runs every sweep_interval_secs while the policy has archiving enabled.
// VACUUM runs on a configurable schedule (cron expression or fixed interval).

use chrono::{DateTime, Utc};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::config::RetentionConfig;
use crate::history_repo::HistoryRepo;
use crate::history_repo::aggregation::{DownsampleInterval, aggregate_fields, bucket_start};
use crate::models::{Fields, METRIC_TYPES, MetricRow};

const MS_PER_DAY: i64 = 86_400_000;

#[derive(Debug, Clone)]
pub struct RetentionWorkerConfig {
    pub sweep_interval_secs: u64,
    /// Optional cron expression for VACUUM (e.g. "0 0 3 * * *" = 03:00 daily). Uses local time.
    pub vacuum_schedule: Option<String>,
    /// Run VACUUM every N seconds when vacuum_schedule is not set.
    pub vacuum_interval_secs: u64,
}

impl From<&RetentionConfig> for RetentionWorkerConfig {
    fn from(c: &RetentionConfig) -> Self {
        Self {
            sweep_interval_secs: c.sweep_interval_secs,
            vacuum_schedule: c.vacuum_schedule.clone(),
            vacuum_interval_secs: c.vacuum_interval_secs,
        }
    }
}

/// Spawns the retention worker. Returns a join handle.
pub fn spawn(repo: Arc<HistoryRepo>, config: RetentionWorkerConfig) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run(repo, config).await;
    })
}

#[instrument(skip(repo), fields(interval_secs = config.sweep_interval_secs))]
async fn run(repo: Arc<HistoryRepo>, config: RetentionWorkerConfig) {
    let mut sweep_interval = tokio::time::interval(Duration::from_secs(config.sweep_interval_secs));
    sweep_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let (vacuum_tx, mut vacuum_rx) = tokio::sync::mpsc::channel::<()>(1);
    tokio::spawn(vacuum_scheduler(config.clone(), vacuum_tx));

    loop {
        tokio::select! {
            _ = sweep_interval.tick() => {
                match run_sweep(&repo, Utc::now()).await {
                    Ok((deleted, downsampled)) => {
                        if deleted > 0 || downsampled > 0 {
                            info!(deleted, downsampled, "retention sweep complete");
                        } else {
                            debug!("retention sweep: nothing to do");
                        }
                    }
                    Err(e) => warn!(error = %e, "retention sweep failed"),
                }
            }
            _ = vacuum_rx.recv() => {
                if let Err(e) = repo.vacuum().await {
                    warn!(error = %e, "vacuum failed");
                } else {
                    info!("vacuum complete");
                }
            }
        }
    }
}

/// Sends a message on `tx` at each VACUUM time (cron or fixed interval). Uses local time for cron.
async fn vacuum_scheduler(config: RetentionWorkerConfig, tx: tokio::sync::mpsc::Sender<()>) {
    if let Some(ref cron_str) = config.vacuum_schedule {
        let Ok(schedule) = cron::Schedule::from_str(cron_str) else {
            warn!(cron = %cron_str, "invalid vacuum_schedule; VACUUM will not run");
            return;
        };
        loop {
            let now = chrono::Local::now();
            if let Some(next) = schedule.after(&now).next() {
                let delay = (next - now).to_std().unwrap_or(Duration::from_secs(1));
                tokio::time::sleep(delay).await;
                if tx.send(()).await.is_err() {
                    break;
                }
            } else {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }
    } else {
        let interval = Duration::from_secs(config.vacuum_interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            if tx.send(()).await.is_err() {
                break;
            }
        }
    }
}

/// One retention pass as of `now`. Returns (rows deleted, buckets rolled up).
pub async fn run_sweep(repo: &HistoryRepo, now: DateTime<Utc>) -> anyhow::Result<(u64, u64)> {
    let mut policy = repo.get_retention_policy().await?;
    if !policy.archive_enabled {
        return Ok((0, 0));
    }
    let now_ms = now.timestamp_millis();

    let retention_cutoff = now_ms - (policy.retention_days as i64) * MS_PER_DAY;
    let deleted = repo.delete_before(retention_cutoff).await?;

    let interval = DownsampleInterval::from_str(&policy.downsample_interval)?;
    let downsample_cutoff = now_ms - (policy.downsample_after_days as i64) * MS_PER_DAY;
    let mut downsampled = 0;
    for metric_type in METRIC_TYPES {
        downsampled += downsample_type(repo, metric_type, interval, downsample_cutoff).await?;
    }

    policy.last_archive_run = Some(now);
    repo.upsert_retention_policy(&policy).await?;
    Ok((deleted, downsampled))
}

/// Roll up every complete bucket before `cutoff_ms`, one day of rows at a time.
async fn downsample_type(
    repo: &HistoryRepo,
    metric_type: &str,
    interval: DownsampleInterval,
    cutoff_ms: i64,
) -> anyhow::Result<u64> {
    let Some(min_ts) = repo.min_timestamp_before(metric_type, cutoff_ms).await? else {
        return Ok(0);
    };
    let width = interval.seconds() * 1000;
    // Only buckets that end at or before the cutoff.
    let upper = bucket_start(cutoff_ms, interval.seconds());
    let mut chunk_start = bucket_start(min_ts, interval.seconds());
    let mut rolled_up: u64 = 0;

    while chunk_start < upper {
        let chunk_end = (chunk_start + MS_PER_DAY).min(upper);
        let rows = repo
            .query_range(metric_type, chunk_start, chunk_end - 1)
            .await?;

        let mut idx = 0;
        while idx < rows.len() {
            let bucket = bucket_start(rows[idx].timestamp, interval.seconds());
            let bucket_end = bucket + width;
            let from = idx;
            while idx < rows.len() && rows[idx].timestamp < bucket_end {
                idx += 1;
            }
            let in_bucket = &rows[from..idx];
            let already_rolled = in_bucket.len() == 1 && in_bucket[0].timestamp == bucket;
            if !in_bucket.is_empty() && !already_rolled {
                let maps: Vec<&Fields> = in_bucket.iter().map(|r| &r.metric_data).collect();
                let row = MetricRow::new(bucket, metric_type, aggregate_fields(&maps));
                repo.replace_range(metric_type, bucket, bucket_end, &row)
                    .await?;
                rolled_up += 1;
            }
        }
        chunk_start = chunk_end;
    }

    if rolled_up > 0 {
        debug!(metric_type, buckets = rolled_up, interval = %interval, "rolled up old rows");
    }
    Ok(rolled_up)
}
