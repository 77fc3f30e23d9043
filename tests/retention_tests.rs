// Retention sweep: expiry, rollup of old rows into downsample buckets, idempotence.

mod common;

use common::{fields, temp_repo, ts};
use perfwatch::models::{MetricRow, RetentionPolicy};
use perfwatch::retention_worker::run_sweep;
use serde_json::json;

const DAY: i64 = 86_400;
const NOW: i64 = 1_000 * DAY;

fn cpu(secs: i64, usage: f64) -> MetricRow {
    MetricRow::new(secs * 1000, "cpu", fields(json!({"usage_percent": usage})))
}

#[tokio::test]
async fn sweep_expires_and_rolls_up_old_rows() {
    let (_dir, repo) = temp_repo().await;
    let hour = NOW - 10 * DAY;
    repo.append_rows(&[
        cpu(NOW - 40 * DAY, 1.0),
        cpu(hour, 10.0),
        cpu(hour + 60, 20.0),
        cpu(hour + 120, 30.0),
        cpu(NOW - DAY, 80.0),
        cpu(NOW - DAY + 5, 90.0),
    ])
    .await
    .unwrap();

    let (deleted, rolled_up) = run_sweep(&repo, ts(NOW)).await.unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(rolled_up, 1);

    let old = repo
        .query_range("cpu", (hour - 3_600) * 1000, (hour + 3_600) * 1000)
        .await
        .unwrap();
    assert_eq!(old.len(), 1);
    assert_eq!(old[0].timestamp, hour * 1000);
    assert_eq!(old[0].metric_data["usage_percent"], json!(20.0));

    // Inside the downsample window nothing is touched.
    let recent = repo
        .query_range("cpu", (NOW - 2 * DAY) * 1000, NOW * 1000)
        .await
        .unwrap();
    assert_eq!(recent.len(), 2);

    let policy = repo.get_retention_policy().await.unwrap();
    assert_eq!(policy.last_archive_run, Some(ts(NOW)));
}

#[tokio::test]
async fn second_sweep_changes_nothing() {
    let (_dir, repo) = temp_repo().await;
    let hour = NOW - 9 * DAY;
    repo.append_rows(&[cpu(hour + 10, 1.0), cpu(hour + 20, 3.0)])
        .await
        .unwrap();

    assert_eq!(run_sweep(&repo, ts(NOW)).await.unwrap(), (0, 1));
    let after_first = repo.query_range("cpu", 0, NOW * 1000).await.unwrap();

    assert_eq!(run_sweep(&repo, ts(NOW)).await.unwrap(), (0, 0));
    let after_second = repo.query_range("cpu", 0, NOW * 1000).await.unwrap();
    assert_eq!(after_first, after_second);
    assert_eq!(after_second[0].timestamp, hour * 1000);
    assert_eq!(after_second[0].metric_data["usage_percent"], json!(2.0));
}

#[tokio::test]
async fn rollup_spans_several_days_and_types() {
    let (_dir, repo) = temp_repo().await;
    let mut rows = Vec::new();
    for d in 8..11 {
        let base = NOW - d * DAY;
        rows.push(cpu(base, 10.0));
        rows.push(cpu(base + 1_800, 30.0));
        rows.push(MetricRow::new(
            (base + 900) * 1000,
            "memory",
            fields(json!({"usage_percent": 40.0})),
        ));
        rows.push(MetricRow::new(
            (base + 1_000) * 1000,
            "memory",
            fields(json!({"usage_percent": 60.0})),
        ));
    }
    repo.append_rows(&rows).await.unwrap();

    let (_, rolled_up) = run_sweep(&repo, ts(NOW)).await.unwrap();
    assert_eq!(rolled_up, 6);
    assert_eq!(repo.count("cpu").await.unwrap(), 3);
    assert_eq!(repo.count("memory").await.unwrap(), 3);
    let memory = repo.query_range("memory", 0, NOW * 1000).await.unwrap();
    assert!(memory.iter().all(|r| r.metric_data["usage_percent"] == json!(50.0)));
    assert!(memory.iter().all(|r| r.timestamp % 3_600_000 == 0));
}

#[tokio::test]
async fn disabled_archiving_is_a_no_op() {
    let (_dir, repo) = temp_repo().await;
    repo.upsert_retention_policy(&RetentionPolicy {
        archive_enabled: false,
        ..RetentionPolicy::default()
    })
    .await
    .unwrap();
    repo.append_rows(&[cpu(NOW - 100 * DAY, 1.0), cpu(NOW - 10 * DAY, 2.0), cpu(NOW - 10 * DAY + 1, 3.0)])
        .await
        .unwrap();

    assert_eq!(run_sweep(&repo, ts(NOW)).await.unwrap(), (0, 0));
    assert_eq!(repo.count("cpu").await.unwrap(), 3);
    assert_eq!(repo.get_retention_policy().await.unwrap().last_archive_run, None);
}

#[tokio::test]
async fn custom_interval_from_policy_is_used() {
    let (_dir, repo) = temp_repo().await;
    repo.upsert_retention_policy(&RetentionPolicy {
        downsample_interval: "5m".into(),
        ..RetentionPolicy::default()
    })
    .await
    .unwrap();
    let base = NOW - 10 * DAY;
    repo.append_rows(&[cpu(base, 1.0), cpu(base + 60, 3.0), cpu(base + 400, 5.0)])
        .await
        .unwrap();

    // A lone row off its bucket start is moved onto it.
    let (_, rolled_up) = run_sweep(&repo, ts(NOW)).await.unwrap();
    assert_eq!(rolled_up, 2);
    let rows = repo.query_range("cpu", 0, NOW * 1000).await.unwrap();
    let stamps: Vec<i64> = rows.iter().map(|r| r.timestamp).collect();
    assert_eq!(stamps, [base * 1000, (base + 300) * 1000]);
    assert_eq!(rows[0].metric_data["usage_percent"], json!(2.0));
}
