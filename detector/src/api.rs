use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use radiograph_common::report::PreviewStats;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::db::CaptureDb;
use crate::observer::{summary_text, ObserverView};
use crate::stats::PipelineStats;
use crate::worker::Control;

const DEFAULT_CAPTURE_LIMIT: usize = 100;
const MAX_CAPTURE_LIMIT: usize = 1000;

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub control: Arc<Control>,
    pub observer: ObserverView,
    pub preview: watch::Receiver<Option<PreviewStats>>,
    pub db: Option<Arc<CaptureDb>>,
    pub stats: Arc<PipelineStats>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CaptureQuery {
    since_ms: Option<i64>,
    limit: Option<usize>,
}

impl CaptureQuery {
    fn limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_CAPTURE_LIMIT)
            .min(MAX_CAPTURE_LIMIT)
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/monitoring", get(monitoring_status))
        .route("/monitoring/start", post(start_monitoring))
        .route("/monitoring/stop", post(stop_monitoring))
        .route("/session/reset", post(reset_session))
        .route("/report", get(latest_report))
        .route("/summary", get(latest_summary))
        .route("/preview", get(latest_preview))
        .route("/log", get(capture_log))
        .route("/captures", get(list_captures))
        .route("/stats", get(pipeline_stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health() -> &'static str {
    "ok"
}

/// GET /monitoring
async fn monitoring_status(State(state): State<Arc<AppState>>) -> Response {
    Json(json!({ "monitoring": state.control.is_monitoring() })).into_response()
}

/// POST /monitoring/start
async fn start_monitoring(State(state): State<Arc<AppState>>) -> Response {
    state.control.start_monitoring();
    monitoring_status(State(state)).await
}

/// POST /monitoring/stop
async fn stop_monitoring(State(state): State<Arc<AppState>>) -> Response {
    state.control.stop_monitoring();
    monitoring_status(State(state)).await
}

/// POST /session/reset: applied by the worker before its next frame.
async fn reset_session(State(state): State<Arc<AppState>>) -> Response {
    state.control.reset_session();
    StatusCode::ACCEPTED.into_response()
}

/// GET /report
async fn latest_report(State(state): State<Arc<AppState>>) -> Response {
    match state.observer.report.borrow().clone() {
        Some(report) => Json(report).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /summary, the same text the observer logs with each capture.
async fn latest_summary(State(state): State<Arc<AppState>>) -> Response {
    match state.observer.report.borrow().as_ref() {
        Some(report) => (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            summary_text(report),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /preview
async fn latest_preview(State(state): State<Arc<AppState>>) -> Response {
    match *state.preview.borrow() {
        Some(preview) => Json(preview).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /log (newest first)
async fn capture_log(State(state): State<Arc<AppState>>) -> Response {
    let log = state.observer.log.lock().await;
    Json(log.iter().cloned().collect::<Vec<_>>()).into_response()
}

/// GET /captures?since_ms=&limit=
async fn list_captures(
    State(state): State<Arc<AppState>>,
    Query(q): Query<CaptureQuery>,
) -> Response {
    let Some(db) = state.db.clone() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "capture database unavailable").into_response();
    };
    let since_ms = q.since_ms.unwrap_or(0);
    let limit = q.limit();
    let result = tokio::task::spawn_blocking(move || db.list_captures(since_ms, limit)).await;

    match result {
        Ok(Ok(captures)) => Json(captures).into_response(),
        Ok(Err(e)) => {
            error!(error = %e, "SQLite query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Err(e) => {
            error!(error = %e, "spawn_blocking failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /stats
async fn pipeline_stats(State(state): State<Arc<AppState>>) -> Response {
    Json(state.stats.snapshot()).into_response()
}
