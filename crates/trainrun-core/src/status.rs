//! Run state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a training run.
///
/// `Idle -> Starting -> Running -> {Finished | Error}`. `Starting` is set by
/// `start`; every later transition is written by the worker itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// Fresh runner, nothing started yet.
    #[default]
    Idle,
    /// `start` accepted the run; the worker has not entered its body yet.
    Starting,
    /// Worker is inside its body.
    Running,
    /// Training returned a result path.
    Finished,
    /// Training (or data/output preparation) failed.
    Error,
}

impl RunState {
    /// Returns true if the run is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Error)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// A run may fail before it ever reports `Running` (e.g. the worker
    /// faults while entering its body), so `Starting -> Error` is legal.
    pub fn can_transition_to(&self, next: RunState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Starting)
                | (Self::Starting, Self::Running)
                | (Self::Starting, Self::Error)
                | (Self::Running, Self::Finished)
                | (Self::Running, Self::Error)
        )
    }

    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(RunState::Finished.is_terminal());
        assert!(RunState::Error.is_terminal());
        assert!(!RunState::Running.is_terminal());
        assert!(!RunState::Idle.is_terminal());
    }

    #[test]
    fn test_transitions() {
        assert!(RunState::Idle.can_transition_to(RunState::Starting));
        assert!(RunState::Starting.can_transition_to(RunState::Running));
        assert!(RunState::Running.can_transition_to(RunState::Finished));
        assert!(RunState::Running.can_transition_to(RunState::Error));
        assert!(!RunState::Finished.can_transition_to(RunState::Error));
        assert!(!RunState::Error.can_transition_to(RunState::Finished));
        assert!(!RunState::Idle.can_transition_to(RunState::Running));
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(
            serde_json::to_string(&RunState::Finished).unwrap(),
            "\"finished\""
        );
        assert_eq!(RunState::Starting.to_string(), "starting");
    }
}
