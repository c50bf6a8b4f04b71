//! Run history handlers.

use std::io::ErrorKind;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use tracing::warn;
use trainrun_core::{parse_training_log, HistoricRecord, LogSummary, RunId};

use crate::http::responses::{ApiError, ApiResult, ErrorResponse, RunListResponse};
use crate::state::AppState;

/// List registered runs.
pub async fn list_runs(State(state): State<Arc<AppState>>) -> Json<RunListResponse> {
    Json(RunListResponse {
        runs: state.runner.registry().list(),
    })
}

/// Artifact directory and original configuration of one run.
pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> ApiResult<HistoricRecord> {
    lookup(&state, run_id).map(Json)
}

/// Structured summary of a run's companion log.
pub async fn run_summary(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> ApiResult<LogSummary> {
    let record = lookup(&state, run_id)?;
    let log_path = record.log_path();

    let text = tokio::fs::read_to_string(&log_path)
        .await
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => ErrorResponse::not_found(format!(
                "no log file for run {}",
                record.run_id
            )),
            _ => {
                warn!(path = %log_path.display(), error = %e, "Failed to read run log");
                ErrorResponse::internal(format!("failed to read log for run {}", record.run_id))
            }
        })?;

    Ok(Json(parse_training_log(&text)))
}

fn lookup(state: &AppState, run_id: String) -> Result<HistoricRecord, ApiError> {
    let run_id = RunId::new(run_id);
    state
        .runner
        .registry()
        .lookup(&run_id)
        .ok_or_else(|| ErrorResponse::not_found(format!("Run not found: {}", run_id)))
}
