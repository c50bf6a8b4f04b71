//! Single-flight job runner.
//!
//! A [`JobRunner`] owns at most one active run. `start` validates the
//! configuration, claims the active flag, subscribes the run to the log
//! bridge and launches the worker on its own OS thread, returning right away.
//! The worker drives the run's state machine. A run's event stream is claimed
//! once through `take_progress` and drained, together with a tail of its
//! companion log, by [`RunProgress::forward`].
//!
//! The worker's teardown always runs, whatever happened inside the body:
//! unsubscribe from the bridge, record the terminal state, clear the active
//! flag, then push the terminal event followed by `eof`.

use std::collections::HashMap;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use tracing::{debug, error, info, warn};
use trainrun_core::{HistoricRecord, RunConfig, RunEvent, RunId, RunSnapshot, RunState};

use crate::bridge::{BridgeGuard, LogBridge};
use crate::channel::{event_channel, EventReceiver, EventSender};
use crate::config::RunnerConfig;
use crate::error::{RunnerError, WorkerFault};
use crate::registry::HistoricRegistry;
use crate::sink::ProgressSink;
use crate::tailer::{LogPath, LogTailer};
use crate::trainer::{Trainer, TrainingJob};

/// Milestone stages, in the order the worker reaches them.
pub mod stage {
    pub const WORKER_STARTED: &str = "worker_started";
    pub const OUTPUT_PREPARED: &str = "output_prepared";
    pub const FIT_BEGIN: &str = "fit_begin";
}

type RunTable = Arc<Mutex<HashMap<RunId, RunEntry>>>;

/// Everything the runner keeps about one run it started.
struct RunEntry {
    snapshot: RunSnapshot,
    /// Consumer side of the channel, until a progress stream takes it.
    events: Option<(EventReceiver, EventSender)>,
    log_path: LogPath,
}

/// Runs training jobs one at a time.
pub struct JobRunner {
    config: RunnerConfig,
    trainer: Arc<dyn Trainer>,
    bridge: LogBridge,
    registry: Arc<dyn HistoricRegistry>,
    active: Arc<AtomicBool>,
    runs: RunTable,
}

impl JobRunner {
    pub fn new(
        config: RunnerConfig,
        trainer: Arc<dyn Trainer>,
        bridge: LogBridge,
        registry: Arc<dyn HistoricRegistry>,
    ) -> Self {
        Self {
            config,
            trainer,
            bridge,
            registry,
            active: Arc::new(AtomicBool::new(false)),
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<dyn HistoricRegistry> {
        &self.registry
    }

    /// Whether a run is currently active.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Check the required fields of a configuration. Never mutates anything.
    pub fn validate(&self, cfg: &RunConfig) -> Result<(), RunnerError> {
        cfg.validate().map_err(RunnerError::from)
    }

    /// Start a run and return its id without waiting for it.
    pub fn start(&self, cfg: RunConfig) -> Result<RunId, RunnerError> {
        if self.is_active() {
            return Err(RunnerError::Conflict);
        }
        self.validate(&cfg)?;
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RunnerError::Conflict);
        }

        let run_id = RunId::generate();
        let (sender, receiver) = event_channel(run_id.clone());
        let log_path: LogPath = Arc::new(OnceLock::new());

        lock(&self.runs).insert(
            run_id.clone(),
            RunEntry {
                snapshot: RunSnapshot::starting(run_id.clone()),
                events: Some((receiver, sender.clone())),
                log_path: Arc::clone(&log_path),
            },
        );

        let teardown = Teardown {
            run_id: run_id.clone(),
            bridge: Some(self.bridge.install(sender.clone())),
            runs: Arc::clone(&self.runs),
            active: Arc::clone(&self.active),
            sender: sender.clone(),
            outcome: None,
        };
        sender.send(RunEvent::State {
            run_id: run_id.clone(),
            state: RunState::Running,
        });

        let worker = Worker {
            run_id: run_id.clone(),
            cfg,
            config: self.config.clone(),
            trainer: Arc::clone(&self.trainer),
            registry: Arc::clone(&self.registry),
            runs: Arc::clone(&self.runs),
            sender,
            log_path,
        };

        // The worker logs under the caller's subscriber, not just the global one.
        let dispatch = tracing::dispatcher::get_default(|d| d.clone());
        std::thread::Builder::new()
            .name(format!("trainrun-worker-{}", short_id(&run_id)))
            .spawn(move || {
                tracing::dispatcher::with_default(&dispatch, || worker.run(teardown));
            })
            .map_err(|e| {
                // The dropped closure's teardown already failed the run.
                error!(run_id = %run_id, error = %e, "Failed to spawn worker thread");
                RunnerError::Spawn(e)
            })?;

        info!(run_id = %run_id, "Run started");
        Ok(run_id)
    }

    /// Latest snapshot of a run started by this runner.
    pub fn status(&self, run_id: &RunId) -> Result<RunSnapshot, RunnerError> {
        lock(&self.runs)
            .get(run_id)
            .map(|entry| entry.snapshot.clone())
            .ok_or_else(|| RunnerError::RunNotFound(run_id.clone()))
    }

    /// Claim a run's event stream without consuming it yet.
    ///
    /// Each run's stream can be claimed once. Dropping the returned handle
    /// before forwarding releases everything buffered for the run.
    pub fn take_progress(&self, run_id: &RunId) -> Result<RunProgress, RunnerError> {
        let mut runs = lock(&self.runs);
        let entry = runs
            .get_mut(run_id)
            .ok_or_else(|| RunnerError::RunNotFound(run_id.clone()))?;
        let (events, sender) = entry
            .events
            .take()
            .ok_or_else(|| RunnerError::StreamTaken(run_id.clone()))?;
        Ok(RunProgress {
            run_id: run_id.clone(),
            events,
            sender,
            log_path: Arc::clone(&entry.log_path),
            tail_interval: self.config.tail_interval,
        })
    }

    /// Forward a run's events to `sink` until its end of stream.
    ///
    /// Shorthand for [`take_progress`](Self::take_progress) followed by
    /// [`RunProgress::forward`].
    pub async fn stream_progress<S>(&self, run_id: &RunId, sink: &mut S) -> Result<(), RunnerError>
    where
        S: ProgressSink + ?Sized,
    {
        self.take_progress(run_id)?.forward(sink).await
    }

    /// Pausing is not supported.
    pub fn pause(&self) -> Result<(), RunnerError> {
        Err(RunnerError::Unsupported("pause"))
    }

    /// Resuming is not supported.
    pub fn resume(&self) -> Result<(), RunnerError> {
        Err(RunnerError::Unsupported("resume"))
    }

    /// Cancelling is not supported: a started run always runs to completion.
    pub fn cancel(&self, _run_id: &RunId) -> Result<(), RunnerError> {
        Err(RunnerError::Unsupported("cancel"))
    }

    /// Restarting is not supported.
    pub fn restart(&self) -> Result<(), RunnerError> {
        Err(RunnerError::Unsupported("restart"))
    }
}

/// A claimed run event stream.
pub struct RunProgress {
    run_id: RunId,
    events: EventReceiver,
    sender: EventSender,
    log_path: LogPath,
    tail_interval: Duration,
}

impl RunProgress {
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Drain the run into `sink` until its end of stream.
    ///
    /// Tails the companion log alongside. Every event except `eof` is emitted
    /// exactly once, in push order, with the terminal event last. Dropping
    /// the returned future stops the tailer; the run itself continues.
    pub async fn forward<S>(self, sink: &mut S) -> Result<(), RunnerError>
    where
        S: ProgressSink + ?Sized,
    {
        let Self {
            run_id,
            mut events,
            sender,
            log_path,
            tail_interval,
        } = self;
        let mut tailer = Some(LogTailer::spawn(log_path, sender, tail_interval));
        debug!(run_id = %run_id, "Streaming run progress");

        while let Some(event) = events.recv().await {
            if event.is_eof() {
                break;
            }
            if !event.is_terminal() {
                sink.emit(event).await?;
                continue;
            }

            // Deliver the last of the log before the terminal event.
            if let Some(tailer) = tailer.take() {
                tailer.finish().await;
            }
            let mut saw_eof = false;
            while let Some(rest) = events.try_recv() {
                if rest.is_eof() {
                    saw_eof = true;
                    break;
                }
                sink.emit(rest).await?;
            }
            sink.emit(event).await?;
            if saw_eof {
                break;
            }
        }

        if let Some(tailer) = tailer.take() {
            tailer.finish().await;
            while let Some(rest) = events.try_recv() {
                if !rest.is_eof() {
                    sink.emit(rest).await?;
                }
            }
        }
        debug!(run_id = %run_id, "Run progress stream ended");
        Ok(())
    }
}

/// State moved onto the worker thread.
struct Worker {
    run_id: RunId,
    cfg: RunConfig,
    config: RunnerConfig,
    trainer: Arc<dyn Trainer>,
    registry: Arc<dyn HistoricRegistry>,
    runs: RunTable,
    sender: EventSender,
    log_path: LogPath,
}

impl Worker {
    fn run(self, mut teardown: Teardown) {
        if let Some(entry) = lock(&self.runs).get_mut(&self.run_id) {
            if let Err(e) = entry.snapshot.run() {
                warn!(run_id = %self.run_id, error = %e, "Unexpected run state on worker entry");
            }
        }
        self.milestone(stage::WORKER_STARTED);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.execute()))
            .unwrap_or_else(|payload| Err(WorkerFault::Panic(panic_message(payload.as_ref()))));

        teardown.outcome = Some(match outcome {
            Ok(path) => {
                info!(run_id = %self.run_id, result_path = %path.display(), "Run finished");
                Ok(path.display().to_string())
            }
            Err(fault) => {
                warn!(run_id = %self.run_id, error = %fault, "Run failed");
                Err(fault.to_string())
            }
        });
    }

    fn execute(&self) -> Result<PathBuf, WorkerFault> {
        let job = TrainingJob::resolve(&self.run_id, &self.cfg, &self.config)?;

        fs::create_dir_all(&job.output_dir)?;
        if let Some(logs) = job.log_path.parent() {
            fs::create_dir_all(logs)?;
        }
        fs::File::create(&job.log_path)?;
        // Only published after truncation, so the tailer never sees stale bytes.
        let _ = self.log_path.set(job.log_path.clone());
        self.milestone(stage::OUTPUT_PREPARED);

        let record = HistoricRecord::new(self.run_id.clone(), &job.output_dir, self.cfg.clone());
        if let Err(e) = self.registry.register(record) {
            warn!(run_id = %self.run_id, error = %e, "Failed to register run");
        }

        self.milestone(stage::FIT_BEGIN);
        info!(
            run_id = %self.run_id,
            presets = %job.presets,
            time_limit_secs = ?job.time_limit_secs,
            "Invoking trainer"
        );
        Ok(self.trainer.train(&job)?)
    }

    fn milestone(&self, stage: &str) {
        self.sender
            .send(RunEvent::milestone(self.run_id.clone(), stage));
    }
}

/// Finalizes a run on drop, including during unwinding.
struct Teardown {
    run_id: RunId,
    bridge: Option<BridgeGuard>,
    runs: RunTable,
    active: Arc<AtomicBool>,
    sender: EventSender,
    /// Result path or error text; unset if the worker never got that far.
    outcome: Option<Result<String, String>>,
}

impl Drop for Teardown {
    fn drop(&mut self) {
        drop(self.bridge.take());

        let outcome = self
            .outcome
            .take()
            .unwrap_or_else(|| Err("worker exited before producing a result".to_string()));

        if let Some(entry) = lock(&self.runs).get_mut(&self.run_id) {
            let recorded = match &outcome {
                Ok(path) => entry.snapshot.finish(path.clone()),
                Err(error) => entry.snapshot.fail(error.clone()),
            };
            if let Err(e) = recorded {
                warn!(run_id = %self.run_id, error = %e, "Could not record terminal state");
            }
            entry.snapshot.active = false;
        }
        self.active.store(false, Ordering::SeqCst);

        let run_id = self.run_id.clone();
        self.sender.send(match outcome {
            Ok(result_path) => RunEvent::Finished {
                run_id: run_id.clone(),
                result_path,
            },
            Err(error) => RunEvent::Error {
                run_id: run_id.clone(),
                error,
            },
        });
        self.sender.send(RunEvent::Eof { run_id });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn short_id(run_id: &RunId) -> &str {
    let id = run_id.as_str();
    id.get(..8).unwrap_or(id)
}
