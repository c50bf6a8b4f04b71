//! HTTP request and response types.

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use trainrun_core::RunId;

// ============================================================================
// Run history types
// ============================================================================

/// Response for the run list endpoint.
#[derive(Debug, Serialize)]
pub struct RunListResponse {
    /// Registered runs, oldest first.
    pub runs: Vec<RunId>,
}

// ============================================================================
// Error types
// ============================================================================

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub detail: String,
}

impl ErrorResponse {
    pub fn not_found(detail: impl Into<String>) -> (StatusCode, Json<Self>) {
        (
            StatusCode::NOT_FOUND,
            Json(Self {
                code: "run_not_found",
                detail: detail.into(),
            }),
        )
    }

    pub fn internal(detail: impl Into<String>) -> (StatusCode, Json<Self>) {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(Self {
                code: "server_error",
                detail: detail.into(),
            }),
        )
    }
}

/// Error returned by the JSON handlers.
pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Result of a JSON handler.
pub type ApiResult<T> = Result<Json<T>, ApiError>;

