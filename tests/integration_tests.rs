// Integration tests: HTTP and WebSocket endpoints

mod common;

use axum::http::StatusCode;
use axum_test::TestServer;
use chrono::SecondsFormat;
use common::{FixedCollector, MemoryStore, fields, ts};
use perfwatch::aggregator::Aggregator;
use perfwatch::collectors::Collector;
use perfwatch::history_repo::MetricStore;
use perfwatch::lifecycle::Orchestrator;
use perfwatch::models::{LiveMessage, MetricRow};
use perfwatch::routes;
use perfwatch::writer::{BatchWriter, BatchWriterConfig};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

fn cpu_row(secs: i64, usage: f64) -> MetricRow {
    MetricRow::new(secs * 1000, "cpu", fields(json!({"usage_percent": usage})))
}

fn iso(secs: i64) -> String {
    ts(secs).to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn test_app(store: Arc<MemoryStore>) -> (axum::Router, Arc<Orchestrator>) {
    let store: Arc<dyn MetricStore> = store;
    let collectors: Vec<Arc<dyn Collector>> = vec![Arc::new(FixedCollector::new(
        "cpu",
        json!({"usage_percent": 12.5}),
    ))];
    let aggregator = Arc::new(Aggregator::new(collectors, Duration::from_millis(50)));
    let writer = Arc::new(BatchWriter::new(
        store.clone(),
        BatchWriterConfig {
            batch_size: 10,
            flush_interval: Duration::from_millis(500),
            stop_timeout: Duration::from_secs(2),
        },
    ));
    let orchestrator = Orchestrator::new(
        aggregator,
        writer,
        store.clone(),
        16,
        Duration::from_secs(2),
    );
    (routes::app(orchestrator.clone(), store), orchestrator)
}

/// Build TestServer with http_transport (required for WebSocket tests).
fn test_server_with_http(store: Arc<MemoryStore>) -> (TestServer, Arc<Orchestrator>) {
    let (app, orchestrator) = test_app(store);
    let server = TestServer::builder().http_transport().build(app);
    (server, orchestrator)
}

#[tokio::test]
async fn test_root_endpoint() {
    let (app, _) = test_app(Arc::new(MemoryStore::new()));
    let server = TestServer::new(app);
    let response = server.get("/").await;
    response.assert_status_ok();
    response.assert_text("perfwatch: host telemetry agent");
}

#[tokio::test]
async fn test_version_endpoint() {
    let (app, _) = test_app(Arc::new(MemoryStore::new()));
    let server = TestServer::new(app);
    let response = server.get("/version").await;
    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json.get("name").and_then(|v| v.as_str()), Some("perfwatch"));
    assert!(json.get("version").and_then(|v| v.as_str()).is_some());
}

// --- WebSocket ---
// Receive until a message matches (metrics ticks and pongs interleave).

async fn receive_until(
    ws: &mut axum_test::TestWebSocket,
    mut wanted: impl FnMut(&LiveMessage) -> bool,
) -> LiveMessage {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let text = ws.receive_text().await;
        if let Ok(msg) = serde_json::from_str::<LiveMessage>(&text)
            && wanted(&msg)
        {
            return msg;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for message"
        );
    }
}

#[tokio::test]
async fn test_ws_streams_metrics_and_starts_collection() {
    let (server, orchestrator) = test_server_with_http(Arc::new(MemoryStore::new()));
    let mut ws = server
        .get_websocket("/api/ws/metrics")
        .await
        .into_websocket()
        .await;

    let msg = receive_until(&mut ws, |m| matches!(m, LiveMessage::Metrics { .. })).await;
    let LiveMessage::Metrics { data, .. } = msg else {
        unreachable!()
    };
    assert_eq!(data.cpu.unwrap()["usage_percent"], json!(12.5));
    assert!(data.disk.is_none());
    assert_eq!(orchestrator.subscriber_count(), 1);
    assert!(orchestrator.is_collecting().await);
}

#[tokio::test]
async fn test_ws_ping_gets_pong() {
    let (server, _) = test_server_with_http(Arc::new(MemoryStore::new()));
    let mut ws = server
        .get_websocket("/api/ws/metrics")
        .await
        .into_websocket()
        .await;

    ws.send_text(r#"{"type":"ping"}"#).await;
    let msg = receive_until(&mut ws, |m| *m == LiveMessage::Pong).await;
    assert_eq!(msg, LiveMessage::Pong);

    // Unknown and malformed frames are ignored; the stream keeps going.
    ws.send_text(r#"{"type":"subscribe"}"#).await;
    ws.send_text("not json").await;
    receive_until(&mut ws, |m| matches!(m, LiveMessage::Metrics { .. })).await;
}

#[tokio::test]
async fn test_ws_close_stops_collection_and_persists() {
    let store = Arc::new(MemoryStore::new());
    let (server, orchestrator) = test_server_with_http(store.clone());
    let mut ws = server
        .get_websocket("/api/ws/metrics")
        .await
        .into_websocket()
        .await;
    receive_until(&mut ws, |m| matches!(m, LiveMessage::Metrics { .. })).await;
    ws.close().await;

    for _ in 0..100 {
        if orchestrator.subscriber_count() == 0 && !orchestrator.is_collecting().await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(orchestrator.subscriber_count(), 0);
    assert!(!orchestrator.is_collecting().await);
    assert_eq!(orchestrator.stops_total(), 1);
    assert!(store.all_rows().iter().any(|r| r.metric_type == "cpu"));
}

// --- History ---

#[tokio::test]
async fn test_history_returns_rows_in_window() {
    let store = Arc::new(MemoryStore::with_rows(vec![
        cpu_row(1_000, 10.0),
        cpu_row(1_030, 20.0),
        cpu_row(5_000, 90.0),
    ]));
    let (app, _) = test_app(store);
    let server = TestServer::new(app);

    let response = server
        .get("/api/history/cpu")
        .add_query_param("start", iso(900))
        .add_query_param("end", iso(2_000))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["metric_type"], json!("cpu"));
    assert_eq!(body["interval"], Value::Null);
    let rows = body["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["timestamp"], json!(1_000_000));
    assert_eq!(rows[1]["metric_data"]["usage_percent"], json!(20.0));
}

#[tokio::test]
async fn test_history_downsamples_with_interval() {
    let store = Arc::new(MemoryStore::with_rows(vec![
        cpu_row(1_020, 10.0),
        cpu_row(1_030, 20.0),
    ]));
    let (app, _) = test_app(store);
    let server = TestServer::new(app);

    let response = server
        .get("/api/history/cpu")
        .add_query_param("start", iso(900))
        .add_query_param("end", iso(1_100))
        .add_query_param("interval", "1m")
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["interval"], json!("1m"));
    assert_eq!(body["rows"][0]["timestamp"], json!(1_020_000));
    assert_eq!(body["rows"][0]["metric_data"]["usage_percent"], json!(15.0));
}

#[tokio::test]
async fn test_history_rejects_bad_requests() {
    let (app, _) = test_app(Arc::new(MemoryStore::new()));
    let server = TestServer::new(app);

    let response = server
        .get("/api/history/cpu")
        .add_query_param("interval", "7s")
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["detail"], json!("Invalid interval: 7s"));

    let response = server.get("/api/history/gpu").await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["detail"], json!("Invalid metric type: gpu"));

    let response = server
        .get("/api/history/cpu")
        .add_query_param("start", iso(2_000))
        .add_query_param("end", iso(1_000))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_compare_against_custom_baseline() {
    let store = Arc::new(MemoryStore::with_rows(vec![
        cpu_row(10_000, 60.0),
        cpu_row(1_000, 40.0),
    ]));
    let (app, _) = test_app(store);
    let server = TestServer::new(app);

    let response = server
        .get("/api/history/cpu/compare")
        .add_query_param("start", iso(9_900))
        .add_query_param("end", iso(10_100))
        .add_query_param("compare_start", iso(900))
        .add_query_param("compare_end", iso(1_100))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["summary"]["current_avg"], json!(60.0));
    assert_eq!(body["summary"]["comparison_avg"], json!(40.0));
    assert_eq!(body["summary"]["change_percent"], json!(50.0));
}

#[tokio::test]
async fn test_compare_rejects_unknown_target() {
    let (app, _) = test_app(Arc::new(MemoryStore::new()));
    let server = TestServer::new(app);
    let response = server
        .get("/api/history/memory/compare")
        .add_query_param("compare_to", "last_month")
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.json::<Value>()["detail"],
        json!("Invalid comparison target: last_month")
    );
}
