//! Destinations for a run's progress events.

use async_trait::async_trait;
use tokio::sync::mpsc;
use trainrun_core::RunEvent;

use crate::error::RunnerError;

/// Receives every forwarded event of a progress stream, in push order.
///
/// Returning an error ends the stream; the run itself keeps going.
#[async_trait]
pub trait ProgressSink: Send {
    async fn emit(&mut self, event: RunEvent) -> Result<(), RunnerError>;
}

#[async_trait]
impl ProgressSink for mpsc::UnboundedSender<RunEvent> {
    async fn emit(&mut self, event: RunEvent) -> Result<(), RunnerError> {
        self.send(event).map_err(|_| RunnerError::SinkClosed)
    }
}

#[async_trait]
impl ProgressSink for mpsc::Sender<RunEvent> {
    async fn emit(&mut self, event: RunEvent) -> Result<(), RunnerError> {
        self.send(event).await.map_err(|_| RunnerError::SinkClosed)
    }
}

/// Collects events in memory.
#[async_trait]
impl ProgressSink for Vec<RunEvent> {
    async fn emit(&mut self, event: RunEvent) -> Result<(), RunnerError> {
        self.push(event);
        Ok(())
    }
}
