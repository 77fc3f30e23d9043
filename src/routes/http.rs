// GET handlers: version, read-only history and comparison.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use super::AppState;
use crate::error::HistoryError;
use crate::history_repo::aggregation::{
    CompareShift, compare_custom_range, compare_history, query_history,
};
use crate::version::{NAME, VERSION};

const DEFAULT_LIMIT: usize = 1000;

/// GET /version: package name and version from Cargo.toml.
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

/// Validation errors become 400 `{"detail": ...}`; store failures 500.
pub(super) struct ApiError(HistoryError);

impl From<HistoryError> for ApiError {
    fn from(e: HistoryError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            HistoryError::Query(e) => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "detail": e.to_string() })),
            )
                .into_response(),
            HistoryError::Store(e) => {
                tracing::warn!(error = %e, operation = "history_query", "history query failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "detail": "history store unavailable" })),
                )
                    .into_response()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct HistoryParams {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    limit: Option<usize>,
    interval: Option<String>,
}

/// Missing bounds default to the last hour ending now.
fn window(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> (DateTime<Utc>, DateTime<Utc>) {
    let end = end.unwrap_or_else(Utc::now);
    let start = start.unwrap_or(end - Duration::hours(1));
    (start, end)
}

/// GET /api/history/{metric_type}?start=&end=&limit=&interval=
pub(super) async fn history_handler(
    State(state): State<AppState>,
    Path(metric_type): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (start, end) = window(params.start, params.end);
    let result = query_history(
        state.store.as_ref(),
        &metric_type,
        start,
        end,
        params.limit.unwrap_or(DEFAULT_LIMIT),
        params.interval.as_deref(),
    )
    .await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub(super) struct CompareParams {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    interval: Option<String>,
    /// "yesterday" (default) or "last_week"; ignored when a custom baseline is given.
    compare_to: Option<String>,
    compare_start: Option<DateTime<Utc>>,
    compare_end: Option<DateTime<Utc>>,
}

/// GET /api/history/{metric_type}/compare
pub(super) async fn compare_handler(
    State(state): State<AppState>,
    Path(metric_type): Path<String>,
    Query(params): Query<CompareParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (start, end) = window(params.start, params.end);
    let store = state.store.as_ref();
    let interval = params.interval.as_deref();

    let result = match (params.compare_start, params.compare_end) {
        (Some(b_start), Some(b_end)) => {
            compare_custom_range(store, &metric_type, (start, end), (b_start, b_end), interval)
                .await?
        }
        _ => {
            let shift: CompareShift = params
                .compare_to
                .as_deref()
                .unwrap_or("yesterday")
                .parse()
                .map_err(HistoryError::from)?;
            compare_history(store, &metric_type, start, end, shift, interval).await?
        }
    };
    Ok(Json(result))
}
