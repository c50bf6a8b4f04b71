//! Incremental tail of a growing log file.
//!
//! Each tick reads the whole file, compares its length with what was already
//! seen and pushes only the new suffix as a tail `log` event. A missing file
//! or a failed read skips the tick. The loop is a tokio task that yields
//! between ticks and stops as soon as it is cancelled. A graceful finish also
//! flushes any held-back partial UTF-8 sequence, lossily.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use trainrun_core::RunEvent;

use crate::channel::EventSender;

/// Path of the file to tail, published once it exists.
///
/// The worker only knows the companion log location after it has prepared the
/// output directory; until then the tailer idles.
pub type LogPath = Arc<OnceLock<PathBuf>>;

/// Handle to a running tail task. Dropping it stops the task.
#[derive(Debug)]
pub struct LogTailer {
    finish: CancellationToken,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl LogTailer {
    /// Start tailing `path` into `sender`, reading once per `interval`.
    pub fn spawn(path: LogPath, sender: EventSender, interval: Duration) -> Self {
        let finish = CancellationToken::new();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(tail_loop(
            path,
            sender,
            interval,
            finish.clone(),
            cancel.clone(),
        ));
        Self {
            finish,
            cancel,
            handle: Some(handle),
        }
    }

    /// Stop after one last read, and wait for the task to exit.
    ///
    /// Everything written to the file before this call is pushed before it
    /// returns.
    pub async fn finish(mut self) {
        self.finish.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                debug!(error = %e, "Log tailer task ended abnormally");
            }
        }
    }
}

impl Drop for LogTailer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn tail_loop(
    path: LogPath,
    sender: EventSender,
    interval: Duration,
    finish: CancellationToken,
    cancel: CancellationToken,
) {
    let mut state = TailState::default();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                trace!(run_id = %sender.run_id(), "Log tailer cancelled");
                return;
            }
            _ = finish.cancelled() => {
                poll_once(&path, &mut state, &sender).await;
                if let Some(rest) = state.flush() {
                    sender.send(RunEvent::tail(sender.run_id().clone(), rest));
                }
                trace!(run_id = %sender.run_id(), "Log tailer finished");
                return;
            }
            _ = ticker.tick() => {
                poll_once(&path, &mut state, &sender).await;
            }
        }
    }
}

async fn poll_once(path: &LogPath, state: &mut TailState, sender: &EventSender) {
    let Some(path) = path.get() else {
        return;
    };
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            if let Some(diff) = state.advance(&bytes) {
                sender.send(RunEvent::tail(sender.run_id().clone(), diff));
            }
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Skipping log tail tick");
        }
    }
}

/// Length-diff state of one tailed file.
#[derive(Debug, Default)]
pub(crate) struct TailState {
    seen: usize,
    /// Bytes of an incomplete UTF-8 sequence at the end of the last read.
    pending: Vec<u8>,
}

impl TailState {
    /// Feed the full current contents; returns the newly appended text.
    pub(crate) fn advance(&mut self, contents: &[u8]) -> Option<String> {
        if contents.len() < self.seen {
            // Truncated or replaced: start over.
            self.seen = 0;
            self.pending.clear();
        }
        if contents.len() == self.seen {
            return None;
        }

        self.pending.extend_from_slice(&contents[self.seen..]);
        self.seen = contents.len();

        let mut text = String::new();
        let mut consumed = 0;
        while consumed < self.pending.len() {
            match std::str::from_utf8(&self.pending[consumed..]) {
                Ok(valid) => {
                    text.push_str(valid);
                    consumed = self.pending.len();
                }
                Err(e) => {
                    let valid_end = consumed + e.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[consumed..valid_end]));
                    match e.error_len() {
                        Some(invalid) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            consumed = valid_end + invalid;
                        }
                        // Incomplete sequence at the end; wait for the rest.
                        None => {
                            consumed = valid_end;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..consumed);

        (!text.is_empty()).then_some(text)
    }

    /// Drain held-back bytes when no more input will come.
    pub(crate) fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(text)
    }
}
