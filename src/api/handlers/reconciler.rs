//! Reconciler control endpoints: status and manual trigger.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::app_state::AppState;
use crate::error::{ErrorResponse, ReconcileError};
use crate::scheduler::{PassReport, SchedulerStatus, TickOutcome};

/// `GET /reconciler/status` — Scheduler counters and last pass.
#[utoipa::path(
    get,
    path = "/api/v1/reconciler/status",
    tag = "Reconciler",
    summary = "Reconciler status",
    description = "Returns whether a pass is in flight, pass counters, and the report of the most recent pass.",
    responses(
        (status = 200, description = "Scheduler status", body = SchedulerStatus),
    )
)]
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.reconciler.status().await))
}

/// `POST /reconciler/run` — Run one reconciliation pass now.
///
/// # Errors
///
/// Returns [`ReconcileError::PassInFlight`] if a pass is already running
/// and [`ReconcileError::PassFailed`] if a stage aborted the pass.
#[utoipa::path(
    post,
    path = "/api/v1/reconciler/run",
    tag = "Reconciler",
    summary = "Trigger a pass",
    description = "Runs every synchronizer once, in pipeline order, subject to the single-flight guard. The pass is not queued when another is in flight.",
    responses(
        (status = 200, description = "Pass completed", body = PassReport),
        (status = 409, description = "A pass is already in flight", body = ErrorResponse),
        (status = 500, description = "A stage failed and the pass was aborted", body = ErrorResponse),
    )
)]
pub async fn run(State(state): State<AppState>) -> Result<impl IntoResponse, ReconcileError> {
    match state.reconciler.trigger().await {
        TickOutcome::Completed(report) => Ok((StatusCode::OK, Json(report))),
        TickOutcome::Skipped => Err(ReconcileError::PassInFlight),
        TickOutcome::Failed { stage, error } => Err(ReconcileError::PassFailed {
            stage,
            reason: error,
        }),
    }
}

/// Reconciler routes, mounted under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/reconciler/status", get(status))
        .route("/reconciler/run", post(run))
}
