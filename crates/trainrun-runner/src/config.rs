//! Runner configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Preset used when the run configuration does not name one.
pub const DEFAULT_PRESETS: &str = "medium_quality_faster_train";

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Parent of every run's default output directory (`<runs_root>/<run_id>`).
    pub runs_root: PathBuf,

    /// Preset passed to the trainer when `cfg.presets` is absent.
    pub default_presets: String,

    /// How often the log tailer re-reads the companion log.
    pub tail_interval: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            runs_root: PathBuf::from("runs"),
            default_presets: DEFAULT_PRESETS.to_string(),
            tail_interval: Duration::from_millis(250),
        }
    }
}
