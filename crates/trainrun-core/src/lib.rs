//! TrainRun Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network/transport
//! - Threads or async runtimes
//! - The training operation itself
//!
//! All types here describe a training run: its configuration, identity,
//! state, events and the records kept about it afterwards.

pub mod config;
pub mod error;
pub mod event;
pub mod ids;
pub mod log_summary;
pub mod record;
pub mod status;

// Re-export commonly used types
pub use config::{DataKind, DataSource, RunConfig};
pub use error::CoreError;
pub use event::RunEvent;
pub use ids::RunId;
pub use log_summary::{format_models, parse_training_log, LogSummary, ModelEntry};
pub use record::{companion_log_path, HistoricRecord, RunSnapshot, COMPANION_LOG_PATH};
pub use status::RunState;
