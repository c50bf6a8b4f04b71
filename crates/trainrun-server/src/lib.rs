//! TrainRun server.
//!
//! Hosts the control WebSocket that starts and observes training runs, the
//! log replay WebSocket, and a small read-only HTTP API over run history.

pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod protocol;
pub mod session;
pub mod state;
pub mod ws;

use std::sync::Arc;

use tracing::info;
use trainrun_runner::{CommandTrainer, JobRunner, JsonlRegistry, LogBridge};

pub use config::Config;
pub use error::ServerError;
pub use session::ControlSession;
pub use state::AppState;

/// Build the runner from `config` and serve until Ctrl-C.
///
/// `bridge` must be the same layer installed in the global subscriber, or
/// runs will not see worker log records.
pub async fn serve(config: Config, bridge: LogBridge) -> Result<(), ServerError> {
    let registry = JsonlRegistry::open(config.registry_path.clone())?;
    let trainer = CommandTrainer::new(config.trainer_program.clone()).args(config.trainer_args.clone());
    let runner = Arc::new(JobRunner::new(
        config.runner_config(),
        Arc::new(trainer),
        bridge,
        Arc::new(registry),
    ));

    let router = http::create_router(AppState::new(runner));
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, trainer = %config.trainer_program, "TrainRun server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    info!("TrainRun server stopped");
    Ok(())
}
