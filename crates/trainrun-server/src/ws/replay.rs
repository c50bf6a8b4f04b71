//! Log replay WebSocket.
//!
//! Streams a registered run's companion log as text frames using the same
//! incremental tail as live runs: first everything already written, then
//! whatever is appended, until the client disconnects. Unknown runs and
//! missing logs get a single `ERROR: <reason>` frame.

use std::sync::{Arc, OnceLock};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tracing::{debug, info};
use trainrun_core::{RunEvent, RunId};
use trainrun_runner::{event_channel, EventReceiver, JobRunner, LogTailer};

use crate::state::AppState;

/// Why a replay could not be opened.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("unknown run id {0}")]
    UnknownRun(RunId),

    #[error("log file not found for run {0}")]
    LogMissing(RunId),
}

impl ReplayError {
    /// Sentinel text frame sent instead of log content.
    pub fn frame(&self) -> String {
        format!("ERROR: {}", self)
    }
}

/// A running tail of a registered run's companion log.
pub struct LogReplay {
    events: EventReceiver,
    _tailer: LogTailer,
}

impl LogReplay {
    /// Look the run up and start tailing its log from the beginning.
    pub async fn open(runner: &JobRunner, run_id: &RunId) -> Result<Self, ReplayError> {
        let record = runner
            .registry()
            .lookup(run_id)
            .ok_or_else(|| ReplayError::UnknownRun(run_id.clone()))?;
        let log_path = record.log_path();
        if !tokio::fs::try_exists(&log_path).await.unwrap_or(false) {
            return Err(ReplayError::LogMissing(run_id.clone()));
        }

        let (tx, events) = event_channel(run_id.clone());
        let tailer = LogTailer::spawn(
            Arc::new(OnceLock::from(log_path)),
            tx,
            runner.config().tail_interval,
        );
        Ok(Self {
            events,
            _tailer: tailer,
        })
    }

    /// Next chunk of log text. Stops the tail when dropped.
    pub async fn next_chunk(&mut self) -> Option<String> {
        loop {
            match self.events.recv().await? {
                RunEvent::Log { msg, .. } => return Some(msg),
                _ => continue,
            }
        }
    }
}

/// HTTP handler that upgrades the connection to a log replay.
pub async fn replay_ws(
    ws: WebSocketUpgrade,
    Path(run_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, RunId::new(run_id)))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>, run_id: RunId) {
    let mut replay = match LogReplay::open(&state.runner, &run_id).await {
        Ok(replay) => replay,
        Err(e) => {
            debug!(run_id = %run_id, reason = %e, "Rejecting log replay");
            let _ = socket.send(Message::Text(e.frame())).await;
            let _ = socket.close().await;
            return;
        }
    };

    info!(run_id = %run_id, "Log replay opened");
    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            chunk = replay.next_chunk() => match chunk {
                Some(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(run_id = %run_id, error = %e, "Log replay receive error");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    drop(replay);
    info!(run_id = %run_id, "Log replay closed");
}
