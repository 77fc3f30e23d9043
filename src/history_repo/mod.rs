// SQLite metric store. One row per (timestamp, metric_type), field map stored as JSON text.

pub mod aggregation;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use std::path::Path;
use std::str::FromStr;
use tracing::instrument;

use crate::models::{Fields, MetricRow, RetentionPolicy};

/// What the batch writer and the history engine need from a store.
#[async_trait]
pub trait MetricStore: Send + Sync {
    async fn append_rows(&self, rows: &[MetricRow]) -> anyhow::Result<()>;

    /// Rows of one type with `start_ms <= timestamp <= end_ms`, ascending.
    async fn query_range(
        &self,
        metric_type: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> anyhow::Result<Vec<MetricRow>>;
}

pub struct HistoryRepo {
    pool: SqlitePool,
}

impl HistoryRepo {
    pub async fn connect(path: &str, max_pool_size: u32) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_pool_size)
            .connect_with(opts)
            .await?;
        Ok(Self { pool })
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metrics_snapshot (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                metric_type TEXT NOT NULL,
                metric_data TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_metrics_type_timestamp ON metrics_snapshot(metric_type, timestamp)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS archive_policy (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                retention_days INTEGER NOT NULL,
                archive_enabled INTEGER NOT NULL,
                downsample_after_days INTEGER NOT NULL,
                downsample_interval TEXT NOT NULL,
                last_archive_run INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, rows), fields(repo = "history", operation = "append_rows", rows_count = rows.len()))]
    pub async fn append_rows(&self, rows: &[MetricRow]) -> anyhow::Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for row in rows {
            let data = serde_json::to_string(&row.metric_data)?;
            sqlx::query(
                "INSERT INTO metrics_snapshot (timestamp, metric_type, metric_data) VALUES ($1, $2, $3)",
            )
            .bind(row.timestamp)
            .bind(&row.metric_type)
            .bind(&data)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self), fields(repo = "history", operation = "query_range"))]
    pub async fn query_range(
        &self,
        metric_type: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> anyhow::Result<Vec<MetricRow>> {
        let rows = sqlx::query(
            "SELECT timestamp, metric_type, metric_data FROM metrics_snapshot
             WHERE metric_type = $1 AND timestamp >= $2 AND timestamp <= $3
             ORDER BY timestamp ASC, id ASC",
        )
        .bind(metric_type)
        .bind(start_ms)
        .bind(end_ms)
        .fetch_all(&self.pool)
        .await?;
        Self::parse_rows(rows)
    }

    /// Most recent rows of one type, newest first.
    #[instrument(skip(self), fields(repo = "history", operation = "latest"))]
    pub async fn latest(&self, metric_type: &str, limit: u32) -> anyhow::Result<Vec<MetricRow>> {
        let rows = sqlx::query(
            "SELECT timestamp, metric_type, metric_data FROM metrics_snapshot
             WHERE metric_type = $1 ORDER BY timestamp DESC, id DESC LIMIT $2",
        )
        .bind(metric_type)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Self::parse_rows(rows)
    }

    pub async fn count(&self, metric_type: &str) -> anyhow::Result<i64> {
        let n = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM metrics_snapshot WHERE metric_type = $1",
        )
        .bind(metric_type)
        .fetch_one(&self.pool)
        .await?;
        Ok(n)
    }

    /// Delete every row older than `cutoff_ms` (all types).
    #[instrument(skip(self), fields(repo = "history", operation = "delete_before"))]
    pub async fn delete_before(&self, cutoff_ms: i64) -> anyhow::Result<u64> {
        let r = sqlx::query("DELETE FROM metrics_snapshot WHERE timestamp < $1")
            .bind(cutoff_ms)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected())
    }

    /// Delete rows of one type in [start_ms, end_ms).
    #[instrument(skip(self), fields(repo = "history", operation = "delete_range"))]
    pub async fn delete_range(
        &self,
        metric_type: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> anyhow::Result<u64> {
        let r = sqlx::query(
            "DELETE FROM metrics_snapshot WHERE metric_type = $1 AND timestamp >= $2 AND timestamp < $3",
        )
        .bind(metric_type)
        .bind(start_ms)
        .bind(end_ms)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected())
    }

    /// Swap all rows of one type in [start_ms, end_ms) for a single row, atomically.
    #[instrument(skip(self, row), fields(repo = "history", operation = "replace_range"))]
    pub async fn replace_range(
        &self,
        metric_type: &str,
        start_ms: i64,
        end_ms: i64,
        row: &MetricRow,
    ) -> anyhow::Result<u64> {
        let data = serde_json::to_string(&row.metric_data)?;
        let mut tx = self.pool.begin().await?;
        let r = sqlx::query(
            "DELETE FROM metrics_snapshot WHERE metric_type = $1 AND timestamp >= $2 AND timestamp < $3",
        )
        .bind(metric_type)
        .bind(start_ms)
        .bind(end_ms)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO metrics_snapshot (timestamp, metric_type, metric_data) VALUES ($1, $2, $3)",
        )
        .bind(row.timestamp)
        .bind(&row.metric_type)
        .bind(&data)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(r.rows_affected())
    }

    /// Oldest timestamp of one type strictly before `cutoff_ms` (rollup lower bound).
    pub async fn min_timestamp_before(
        &self,
        metric_type: &str,
        cutoff_ms: i64,
    ) -> anyhow::Result<Option<i64>> {
        let row = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT MIN(timestamp) FROM metrics_snapshot WHERE metric_type = $1 AND timestamp < $2",
        )
        .bind(metric_type)
        .bind(cutoff_ms)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Insert `defaults` unless a policy row already exists.
    pub async fn seed_retention_policy(&self, defaults: &RetentionPolicy) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO archive_policy
             (id, retention_days, archive_enabled, downsample_after_days, downsample_interval, last_archive_run)
             VALUES (1, $1, $2, $3, $4, NULL)",
        )
        .bind(defaults.retention_days as i64)
        .bind(defaults.archive_enabled)
        .bind(defaults.downsample_after_days as i64)
        .bind(&defaults.downsample_interval)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Stored policy; creates the default one if the table is empty.
    #[instrument(skip(self), fields(repo = "history", operation = "get_retention_policy"))]
    pub async fn get_retention_policy(&self) -> anyhow::Result<RetentionPolicy> {
        let row = sqlx::query(
            "SELECT retention_days, archive_enabled, downsample_after_days, downsample_interval, last_archive_run
             FROM archive_policy WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            let policy = RetentionPolicy::default();
            self.seed_retention_policy(&policy).await?;
            return Ok(policy);
        };

        let retention_days: i64 = row.try_get("retention_days")?;
        let downsample_after_days: i64 = row.try_get("downsample_after_days")?;
        let last_run_ms: Option<i64> = row.try_get("last_archive_run")?;
        Ok(RetentionPolicy {
            retention_days: u32::try_from(retention_days)?,
            archive_enabled: row.try_get("archive_enabled")?,
            downsample_after_days: u32::try_from(downsample_after_days)?,
            downsample_interval: row.try_get("downsample_interval")?,
            last_archive_run: last_run_ms.and_then(DateTime::<Utc>::from_timestamp_millis),
        })
    }

    #[instrument(skip(self, policy), fields(repo = "history", operation = "upsert_retention_policy"))]
    pub async fn upsert_retention_policy(&self, policy: &RetentionPolicy) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO archive_policy
             (id, retention_days, archive_enabled, downsample_after_days, downsample_interval, last_archive_run)
             VALUES (1, $1, $2, $3, $4, $5)",
        )
        .bind(policy.retention_days as i64)
        .bind(policy.archive_enabled)
        .bind(policy.downsample_after_days as i64)
        .bind(&policy.downsample_interval)
        .bind(policy.last_archive_run.map(|t| t.timestamp_millis()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Reclaim space after deletes (run periodically after the retention sweep).
    #[instrument(skip(self), fields(repo = "history", operation = "vacuum"))]
    pub async fn vacuum(&self) -> anyhow::Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }

    fn parse_rows(rows: Vec<SqliteRow>) -> anyhow::Result<Vec<MetricRow>> {
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let timestamp: i64 = row.try_get("timestamp")?;
            let metric_type: String = row.try_get("metric_type")?;
            let data: String = row.try_get("metric_data")?;
            match serde_json::from_str::<Fields>(&data) {
                Ok(metric_data) => out.push(MetricRow {
                    timestamp,
                    metric_type,
                    metric_data,
                }),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        timestamp,
                        metric_type = %metric_type,
                        "skipping row with undecodable metric_data"
                    );
                }
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl MetricStore for HistoryRepo {
    async fn append_rows(&self, rows: &[MetricRow]) -> anyhow::Result<()> {
        HistoryRepo::append_rows(self, rows).await
    }

    async fn query_range(
        &self,
        metric_type: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> anyhow::Result<Vec<MetricRow>> {
        HistoryRepo::query_range(self, metric_type, start_ms, end_ms).await
    }
}
