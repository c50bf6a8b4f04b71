//! TrainRun server binary.

use std::path::PathBuf;

use clap::Parser;
use tracing::Level;
use trainrun_runner::LogBridge;
use trainrun_server::{logging, Config};

/// Single-flight training job server.
#[derive(Parser, Debug)]
#[command(name = "trainrun-server", about = "Single-flight training job server")]
struct Args {
    /// HTTP/WebSocket server address
    #[arg(long, default_value = "127.0.0.1:8000")]
    bind_addr: String,

    /// Directory that receives one output folder per run
    #[arg(long, default_value = "runs")]
    runs_root: PathBuf,

    /// Historic registry file (JSON lines)
    #[arg(long, default_value = "runs/registry.jsonl")]
    registry: PathBuf,

    /// Training command; receives the resolved job as JSON on stdin
    #[arg(long, default_value = "trainrun-train")]
    trainer: String,

    /// Extra argument passed to the training command (repeatable)
    #[arg(long = "trainer-arg", allow_hyphen_values = true)]
    trainer_args: Vec<String>,

    /// Companion log poll interval in milliseconds
    #[arg(long, default_value = "250")]
    tail_interval_ms: u64,

    /// Least severe log level forwarded to run streams
    #[arg(long, default_value = "info")]
    bridge_level: Level,

    /// Console log filter used when RUST_LOG is unset
    #[arg(long, default_value = "trainrun=info")]
    log_filter: String,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            bind_addr: args.bind_addr,
            runs_root: args.runs_root,
            registry_path: args.registry,
            trainer_program: args.trainer,
            trainer_args: args.trainer_args,
            tail_interval_ms: args.tail_interval_ms,
            bridge_level: args.bridge_level,
            log_filter: args.log_filter,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from(Args::parse());

    let bridge = LogBridge::new().with_min_level(config.bridge_level);
    logging::init(&config.log_filter, bridge.clone())?;

    tracing::info!("TrainRun server starting");
    trainrun_server::serve(config, bridge).await?;
    Ok(())
}
