//! HTTP server.
//!
//! Provides endpoints for:
//! - Health check (`/health`)
//! - Run history (`/v1/runs`, `/v1/runs/:run_id`, `/v1/runs/:run_id/summary`)
//! - Control sessions (`/ws/run`)
//! - Log replay (`/ws/runs/:run_id/logs`)

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::ws;

mod handlers;
pub mod responses;

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // API routes
        .route("/v1/runs", get(handlers::list_runs))
        .route("/v1/runs/:run_id", get(handlers::get_run))
        .route("/v1/runs/:run_id/summary", get(handlers::run_summary))
        // WebSocket routes
        .route("/ws/run", get(ws::control_ws))
        .route("/ws/runs/:run_id/logs", get(ws::replay_ws))
        // Observability routes
        .route("/health", get(handlers::health_check))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
