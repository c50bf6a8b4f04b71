//! Core domain errors.

use thiserror::Error;

/// Core domain errors for TrainRun.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Run configuration failed validation.
    #[error("{0}")]
    Validation(String),

    /// Run not known to this runner.
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// Invalid state transition.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
