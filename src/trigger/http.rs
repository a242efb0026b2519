//! HTTP trigger, run status, health and metrics endpoints.
//!
//! | Method | Path                | Response                                  |
//! |--------|---------------------|-------------------------------------------|
//! | POST   | `/run`              | 202 `{run_id}` or 409 `{error, active_run}` |
//! | GET    | `/runs`             | retained run summaries, newest first      |
//! | GET    | `/runs/{id}`        | one run summary or 404                    |
//! | POST   | `/runs/{id}/cancel` | 202 or 404                                |
//! | GET    | `/health`           | liveness, independent of run state        |
//! | GET    | `/metrics`          | Prometheus text exposition                |

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::metrics::metrics_handler;
use crate::pipeline::{PipelineError, PipelineOrchestrator};
use crate::scheduler::{CancelSignal, SourceSpec};

/// Optional body of `POST /run`.
#[derive(Debug, Default, Deserialize)]
pub struct RunRequest {
    /// Replaces the configured sources for this run.
    #[serde(default)]
    pub sources: Option<Vec<SourceSpec>>,
}

#[derive(Clone)]
pub struct TriggerState {
    orchestrator: PipelineOrchestrator,
    started_at: Instant,
}

/// Builds the trigger router.
pub fn router(orchestrator: PipelineOrchestrator) -> Router {
    let state = TriggerState {
        orchestrator,
        started_at: Instant::now(),
    };
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/run", post(trigger_run))
        .route("/runs", get(list_runs))
        .route("/runs/{id}", get(get_run))
        .route("/runs/{id}/cancel", post(cancel_run))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the trigger API until `stop` is raised.
pub async fn serve(
    listener: TcpListener,
    orchestrator: PipelineOrchestrator,
    stop: CancelSignal,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "Trigger API listening");
    }
    axum::serve(listener, router(orchestrator))
        .with_graceful_shutdown(async move { stop.cancelled().await })
        .await
}

async fn health(State(state): State<TriggerState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "lead-sniper",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

fn error_response(status: StatusCode, error: &str, message: impl ToString) -> Response {
    (
        status,
        Json(json!({ "error": error, "message": message.to_string() })),
    )
        .into_response()
}

async fn trigger_run(State(state): State<TriggerState>, body: Bytes) -> Response {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        RunRequest::default()
    } else {
        match serde_json::from_slice::<RunRequest>(&body) {
            Ok(request) => request,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, "bad_request", e),
        }
    };

    let mut config = state.orchestrator.config().clone();
    if let Some(sources) = request.sources {
        config.sources = sources;
    }

    match state.orchestrator.trigger(config) {
        Ok(handle) => {
            info!(run_id = %handle.run_id, "Run triggered over HTTP");
            (StatusCode::ACCEPTED, Json(json!({ "run_id": handle.run_id }))).into_response()
        }
        Err(PipelineError::ConcurrencyConflict { active_run }) => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "conflict", "active_run": active_run })),
        )
            .into_response(),
        Err(e @ (PipelineError::NoSources | PipelineError::Config(_))) => {
            error_response(StatusCode::UNPROCESSABLE_ENTITY, "invalid_run", e)
        }
        Err(e) => {
            warn!(error = %e, "Run trigger failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal", e)
        }
    }
}

async fn list_runs(State(state): State<TriggerState>) -> Response {
    Json(state.orchestrator.runs()).into_response()
}

async fn get_run(State(state): State<TriggerState>, Path(id): Path<Uuid>) -> Response {
    match state.orchestrator.run(id) {
        Some(summary) => Json(summary).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "not_found", format!("run {}", id)),
    }
}

async fn cancel_run(State(state): State<TriggerState>, Path(id): Path<Uuid>) -> Response {
    if state.orchestrator.cancel(id) {
        (StatusCode::ACCEPTED, Json(json!({ "run_id": id }))).into_response()
    } else {
        error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("run {} is not active", id),
        )
    }
}
