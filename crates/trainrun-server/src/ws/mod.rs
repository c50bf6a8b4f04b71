//! WebSocket endpoints.
//!
//! `/ws/run` carries the control protocol; `/ws/runs/:run_id/logs` replays a
//! registered run's companion log.

mod control;
mod replay;

pub use control::control_ws;
pub use replay::{replay_ws, LogReplay, ReplayError};
