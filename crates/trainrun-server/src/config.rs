//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use tracing::Level;
use trainrun_runner::config::DEFAULT_PRESETS;
use trainrun_runner::RunnerConfig;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP/WebSocket bind address.
    pub bind_addr: String,

    /// Parent directory of run outputs.
    pub runs_root: PathBuf,

    /// JSON-lines file backing the historic registry.
    pub registry_path: PathBuf,

    /// Training command and its leading arguments.
    pub trainer_program: String,
    pub trainer_args: Vec<String>,

    /// Companion log poll interval (milliseconds).
    pub tail_interval_ms: u64,

    /// Least severe level forwarded into run streams.
    pub bridge_level: Level,

    /// Default console filter when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            runs_root: PathBuf::from("runs"),
            registry_path: PathBuf::from("runs/registry.jsonl"),
            trainer_program: "trainrun-train".to_string(),
            trainer_args: Vec::new(),
            tail_interval_ms: 250,
            bridge_level: Level::INFO,
            log_filter: "trainrun=info".to_string(),
        }
    }
}

impl Config {
    /// Runner settings derived from this configuration.
    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            runs_root: self.runs_root.clone(),
            default_presets: DEFAULT_PRESETS.to_string(),
            tail_interval: Duration::from_millis(self.tail_interval_ms.max(1)),
        }
    }
}
