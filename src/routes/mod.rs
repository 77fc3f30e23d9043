// HTTP + WebSocket routes

mod http;
mod ws;

use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::history_repo::MetricStore;
use crate::lifecycle::Orchestrator;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) orchestrator: Arc<Orchestrator>,
    pub(crate) store: Arc<dyn MetricStore>,
}

pub fn app(orchestrator: Arc<Orchestrator>, store: Arc<dyn MetricStore>) -> Router {
    let state = AppState {
        orchestrator,
        store,
    };
    Router::new()
        .route("/", get(|| async { "perfwatch: host telemetry agent" })) // GET /
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/ws/metrics", get(ws::ws_metrics)) // WS /api/ws/metrics
        .route("/api/history/{metric_type}", get(http::history_handler))
        .route(
            "/api/history/{metric_type}/compare",
            get(http::compare_handler),
        )
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
