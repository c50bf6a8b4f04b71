//! Runner errors.

use thiserror::Error;
use trainrun_core::{CoreError, RunId};

use crate::trainer::TrainerError;

/// Errors returned by [`JobRunner`](crate::JobRunner) operations.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The run configuration is missing a required field.
    #[error("{0}")]
    Validation(String),

    /// A run is already active on this runner.
    #[error("a run is already in progress")]
    Conflict,

    /// The operation cannot be performed on a training run.
    #[error("{0} is not supported: the training operation cannot be interrupted")]
    Unsupported(&'static str),

    /// No run with this id was started by this runner.
    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    /// The run's event stream was already consumed.
    #[error("event stream for run {0} is already being consumed")]
    StreamTaken(RunId),

    /// The consumer of a progress stream went away.
    #[error("progress sink closed")]
    SinkClosed,

    /// The worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl RunnerError {
    /// Stable machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Conflict => "conflict",
            Self::Unsupported(_) => "unsupported",
            Self::RunNotFound(_) => "run_not_found",
            Self::StreamTaken(_) => "conflict",
            Self::SinkClosed => "sink_closed",
            Self::Spawn(_) => "server_error",
        }
    }
}

impl From<CoreError> for RunnerError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(reason) => Self::Validation(reason),
            CoreError::RunNotFound(id) => Self::RunNotFound(RunId::new(id)),
            other => Self::Validation(other.to_string()),
        }
    }
}

/// Failure inside a worker body. Its `Display` is the run's error text.
#[derive(Debug, Error)]
pub(crate) enum WorkerFault {
    #[error("{0}")]
    Config(#[from] CoreError),

    #[error("failed to prepare output directory: {0}")]
    Prepare(#[from] std::io::Error),

    #[error("{0}")]
    Train(#[from] TrainerError),

    #[error("worker panicked: {0}")]
    Panic(String),
}
