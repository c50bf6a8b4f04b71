//! Events pushed through a run's event channel.

use crate::ids::RunId;
use crate::status::RunState;
use serde::{Deserialize, Serialize};

/// One unit of progress for a run.
///
/// Serialized with an internal `type` tag (`{"type":"log","run_id":..}`).
/// `Eof` is an internal sentinel: it closes the stream and is never
/// forwarded past the channel consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// A structured log record or a raw tail diff of the companion log.
    Log {
        run_id: RunId,
        /// Source name of the record; absent for tail diffs.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        logger: Option<String>,
        /// Lowercase severity; absent for tail diffs.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        level: Option<String>,
        msg: String,
    },
    /// A named stage reached by the worker.
    Milestone { run_id: RunId, stage: String },
    /// State change announcement.
    State { run_id: RunId, state: RunState },
    /// Terminal success.
    Finished { run_id: RunId, result_path: String },
    /// Terminal failure.
    Error { run_id: RunId, error: String },
    /// End of stream.
    Eof { run_id: RunId },
}

impl RunEvent {
    /// Create a structured log event.
    pub fn log(
        run_id: RunId,
        logger: impl Into<String>,
        level: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Log {
            run_id,
            logger: Some(logger.into()),
            level: Some(level.into()),
            msg: msg.into(),
        }
    }

    /// Create a tail-diff log event.
    pub fn tail(run_id: RunId, diff: impl Into<String>) -> Self {
        Self::Log {
            run_id,
            logger: None,
            level: None,
            msg: diff.into(),
        }
    }

    /// Create a milestone event.
    pub fn milestone(run_id: RunId, stage: impl Into<String>) -> Self {
        Self::Milestone {
            run_id,
            stage: stage.into(),
        }
    }

    /// The run this event belongs to.
    pub fn run_id(&self) -> &RunId {
        match self {
            Self::Log { run_id, .. }
            | Self::Milestone { run_id, .. }
            | Self::State { run_id, .. }
            | Self::Finished { run_id, .. }
            | Self::Error { run_id, .. }
            | Self::Eof { run_id } => run_id,
        }
    }

    /// Wire name of the variant (the `type` tag).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Log { .. } => "log",
            Self::Milestone { .. } => "milestone",
            Self::State { .. } => "state",
            Self::Finished { .. } => "finished",
            Self::Error { .. } => "error",
            Self::Eof { .. } => "eof",
        }
    }

    /// Whether this is the end-of-stream sentinel.
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Eof { .. })
    }

    /// Whether this is a terminal outcome (`finished` or `error`).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished { .. } | Self::Error { .. })
    }
}
