//! TrainRun job runner.
//!
//! Runs one training job at a time on a dedicated worker thread and turns
//! everything it produces (tracing records, milestones, the companion log
//! and its terminal outcome) into an ordered per-run event stream.

pub mod bridge;
pub mod channel;
pub mod config;
pub mod error;
pub mod registry;
pub mod runner;
pub mod sink;
pub mod tailer;
pub mod trainer;

pub use bridge::{BridgeGuard, LogBridge};
pub use channel::{event_channel, EventReceiver, EventSender};
pub use config::RunnerConfig;
pub use error::RunnerError;
pub use registry::{HistoricRegistry, JsonlRegistry, MemoryRegistry, RegistryError};
pub use runner::{stage, JobRunner, RunProgress};
pub use sink::ProgressSink;
pub use tailer::{LogPath, LogTailer};
pub use trainer::{CommandTrainer, Trainer, TrainerError, TrainingJob};
