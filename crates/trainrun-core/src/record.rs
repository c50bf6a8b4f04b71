//! Run snapshots and historic records.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CoreError, RunConfig, RunId, RunState};

/// Location of the companion log, relative to a run's artifact directory.
pub const COMPANION_LOG_PATH: &str = "logs/predictor_log.txt";

/// Point-in-time view of a run, as returned by `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    /// Run identifier.
    pub run_id: RunId,

    /// Current state.
    pub state: RunState,

    /// Result artifact path once finished.
    pub result_path: Option<String>,

    /// Error text once failed.
    pub error: Option<String>,

    /// True while the worker is alive and has not pushed its end of stream.
    pub active: bool,

    /// When `start` accepted the run.
    pub started_at: DateTime<Utc>,

    /// When the run reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunSnapshot {
    /// Snapshot for a run that `start` just accepted.
    pub fn starting(run_id: RunId) -> Self {
        Self {
            run_id,
            state: RunState::Starting,
            result_path: None,
            error: None,
            active: true,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Mark the run as running (worker entered its body).
    pub fn run(&mut self) -> Result<(), CoreError> {
        self.transition(RunState::Running)
    }

    /// Mark the run as finished with its result path.
    pub fn finish(&mut self, result_path: impl Into<String>) -> Result<(), CoreError> {
        self.transition(RunState::Finished)?;
        self.result_path = Some(result_path.into());
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Mark the run as failed.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), CoreError> {
        self.transition(RunState::Error)?;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    fn transition(&mut self, next: RunState) -> Result<(), CoreError> {
        if !self.state.can_transition_to(next) {
            return Err(CoreError::InvalidStateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }
}

/// Durable mapping entry from a RunId to its artifacts and original config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricRecord {
    /// Run identifier.
    pub run_id: RunId,

    /// Directory holding the run's artifacts (and its companion log).
    pub artifact_dir: PathBuf,

    /// Configuration the client started the run with.
    pub config: RunConfig,

    /// When the run was registered.
    pub registered_at: DateTime<Utc>,
}

impl HistoricRecord {
    /// Create a new record stamped with the current time.
    pub fn new(run_id: RunId, artifact_dir: impl Into<PathBuf>, config: RunConfig) -> Self {
        Self {
            run_id,
            artifact_dir: artifact_dir.into(),
            config,
            registered_at: Utc::now(),
        }
    }

    /// Path of the companion log for this run.
    pub fn log_path(&self) -> PathBuf {
        companion_log_path(&self.artifact_dir)
    }
}

/// Companion log path inside an artifact directory.
pub fn companion_log_path(artifact_dir: &Path) -> PathBuf {
    artifact_dir.join(COMPANION_LOG_PATH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_lifecycle() {
        let mut snap = RunSnapshot::starting(RunId::new("r1"));
        assert_eq!(snap.state, RunState::Starting);
        assert!(snap.active);

        snap.run().unwrap();
        snap.finish("/runs/r1").unwrap();
        assert_eq!(snap.state, RunState::Finished);
        assert_eq!(snap.result_path.as_deref(), Some("/runs/r1"));
        assert!(snap.finished_at.is_some());
    }

    #[test]
    fn test_terminal_state_written_once() {
        let mut snap = RunSnapshot::starting(RunId::new("r1"));
        snap.run().unwrap();
        snap.fail("disk full").unwrap();
        assert!(snap.finish("/runs/r1").is_err());
        assert_eq!(snap.state, RunState::Error);
        assert_eq!(snap.error.as_deref(), Some("disk full"));
        assert!(snap.result_path.is_none());
    }

    #[test]
    fn test_record_log_path() {
        let record = HistoricRecord::new(RunId::new("r1"), "/runs/r1", RunConfig::default());
        assert_eq!(
            record.log_path(),
            PathBuf::from("/runs/r1/logs/predictor_log.txt")
        );
    }
}
