//! Per-connection control session.
//!
//! A [`ControlSession`] turns text frames into runner calls and writes every
//! reply and run event to the connection's outbound queue. It remembers the
//! run it started (its current run) so `status` and `cancel` can omit the
//! run id. Dropping the session stops its drain loops but never the run.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use trainrun_core::{RunConfig, RunEvent, RunId};
use trainrun_runner::{JobRunner, ProgressSink, RunnerError};

use crate::protocol::{self, event_envelope, ControlMessage, ProtocolError};

/// Protocol state of one control connection.
pub struct ControlSession {
    runner: Arc<JobRunner>,
    outbound: mpsc::UnboundedSender<Value>,
    current_run: Arc<Mutex<Option<RunId>>>,
    drains: Vec<JoinHandle<()>>,
}

impl ControlSession {
    pub fn new(runner: Arc<JobRunner>, outbound: mpsc::UnboundedSender<Value>) -> Self {
        Self {
            runner,
            outbound,
            current_run: Arc::new(Mutex::new(None)),
            drains: Vec::new(),
        }
    }

    /// The run this connection is currently driving, if any.
    pub async fn current_run(&self) -> Option<RunId> {
        self.current_run.lock().await.clone()
    }

    /// Handle one inbound text frame. Errors are reported, never returned.
    pub async fn handle_text(&mut self, text: &str) {
        let message = match protocol::parse_message(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(code = e.code(), error = %e, "Rejected control message");
                self.send(e.to_frame());
                return;
            }
        };

        match self.dispatch(message).await {
            Ok(Dispatched::Reply(reply)) => self.send(reply),
            Ok(Dispatched::Started(run_id)) => {
                // The reply goes out before any of the run's events.
                self.send(protocol::success_reply(json!({ "run_id": run_id })));
                self.spawn_drain(run_id);
            }
            Err(e) => {
                debug!(code = e.code(), error = %e, "Control action failed");
                self.send(e.to_frame());
            }
        }
    }

    /// Stop forwarding events. In-flight runs keep going.
    pub fn teardown(&mut self) {
        for drain in self.drains.drain(..) {
            drain.abort();
        }
    }

    async fn dispatch(&mut self, message: ControlMessage) -> Result<Dispatched, ProtocolError> {
        match message {
            ControlMessage::Start { cfg } => {
                if self.runner.is_active() {
                    return Err(RunnerError::Conflict.into());
                }
                let cfg = RunConfig::from_value(cfg).map_err(RunnerError::from)?;
                self.runner.validate(&cfg)?;
                let run_id = self.runner.start(cfg)?;
                *self.current_run.lock().await = Some(run_id.clone());
                info!(run_id = %run_id, "Run started from control session");
                Ok(Dispatched::Started(run_id))
            }
            ControlMessage::Status { run_id } => {
                let run_id = self.resolve(run_id).await?;
                let snapshot = self.runner.status(&run_id)?;
                Ok(Dispatched::Reply(protocol::success_reply(
                    json!({ "run": snapshot }),
                )))
            }
            ControlMessage::Cancel { run_id } => {
                let run_id = self.resolve(run_id).await?;
                self.runner.cancel(&run_id)?;
                Ok(Dispatched::Reply(protocol::success_reply(
                    json!({ "run_id": run_id }),
                )))
            }
            ControlMessage::Pause => {
                self.runner.pause()?;
                Ok(Dispatched::Reply(protocol::success_reply(json!({}))))
            }
            ControlMessage::Resume => {
                self.runner.resume()?;
                Ok(Dispatched::Reply(protocol::success_reply(json!({}))))
            }
            ControlMessage::Restart => {
                self.runner.restart()?;
                Ok(Dispatched::Reply(protocol::success_reply(json!({}))))
            }
        }
    }

    async fn resolve(&self, run_id: Option<RunId>) -> Result<RunId, ProtocolError> {
        match run_id {
            Some(run_id) => Ok(run_id),
            None => self.current_run().await.ok_or(ProtocolError::NoActiveRun),
        }
    }

    fn spawn_drain(&mut self, run_id: RunId) {
        self.drains.retain(|drain| !drain.is_finished());

        // Claimed here so a drain aborted before its first poll still
        // releases the run's buffered events.
        let progress = match self.runner.take_progress(&run_id) {
            Ok(progress) => progress,
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Could not claim run stream");
                self.send(protocol::fault_frame(e.code(), &e.to_string()));
                return;
            }
        };

        let current_run = Arc::clone(&self.current_run);
        let mut sink = EnvelopeSink {
            outbound: self.outbound.clone(),
        };
        self.drains.push(tokio::spawn(async move {
            match progress.forward(&mut sink).await {
                Ok(()) => debug!(run_id = %run_id, "Run stream drained"),
                Err(RunnerError::SinkClosed) => {
                    debug!(run_id = %run_id, "Connection closed while draining run")
                }
                Err(e) => {
                    warn!(run_id = %run_id, error = %e, "Run stream failed");
                    let _ = sink
                        .outbound
                        .send(protocol::fault_frame(e.code(), &e.to_string()));
                }
            }

            // A newer run may have replaced this one meanwhile.
            let mut current = current_run.lock().await;
            if current.as_ref() == Some(&run_id) {
                *current = None;
            }
        }));
    }

    fn send(&self, frame: Value) {
        if self.outbound.send(frame).is_err() {
            debug!("Dropping frame for closed connection");
        }
    }
}

impl Drop for ControlSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

enum Dispatched {
    Reply(Value),
    Started(RunId),
}

/// Writes event envelopes to a connection's outbound queue.
struct EnvelopeSink {
    outbound: mpsc::UnboundedSender<Value>,
}

#[async_trait]
impl ProgressSink for EnvelopeSink {
    async fn emit(&mut self, event: RunEvent) -> Result<(), RunnerError> {
        match event_envelope(&event) {
            Some(frame) => self
                .outbound
                .send(frame)
                .map_err(|_| RunnerError::SinkClosed),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;
    use trainrun_runner::{
        LogBridge, MemoryRegistry, RunnerConfig, TrainerError, TrainingJob,
    };

    struct Fixture {
        runner: Arc<JobRunner>,
        release: std_mpsc::Sender<()>,
        _dir: tempfile::TempDir,
    }

    /// Runner whose trainer blocks until released, then fails with "disk full"
    /// if the label is "fail".
    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let (release, release_rx) = std_mpsc::channel::<()>();
        let release_rx = std::sync::Mutex::new(release_rx);
        let trainer = move |job: &TrainingJob| -> Result<PathBuf, TrainerError> {
            let _ = release_rx
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(10));
            if job.label == "fail" {
                return Err(TrainerError::Failed("disk full".to_string()));
            }
            Ok(job.output_dir.clone())
        };
        let config = RunnerConfig {
            runs_root: dir.path().to_path_buf(),
            tail_interval: Duration::from_millis(5),
            ..RunnerConfig::default()
        };
        let runner = JobRunner::new(
            config,
            Arc::new(trainer),
            LogBridge::new(),
            Arc::new(MemoryRegistry::new()),
        );
        Fixture {
            runner: Arc::new(runner),
            release,
            _dir: dir,
        }
    }

    fn session(runner: &Arc<JobRunner>) -> (ControlSession, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ControlSession::new(Arc::clone(runner), tx), rx)
    }

    async fn next_frame(rx: &mut mpsc::UnboundedReceiver<Value>) -> Value {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("frame in time")
            .expect("channel open")
    }

    /// Read frames until one satisfies `pred`, returning everything read.
    async fn frames_until<F: Fn(&Value) -> bool>(
        rx: &mut mpsc::UnboundedReceiver<Value>,
        pred: F,
    ) -> Vec<Value> {
        let mut frames = Vec::new();
        loop {
            let frame = next_frame(rx).await;
            let done = pred(&frame);
            frames.push(frame);
            if done {
                return frames;
            }
        }
    }

    fn is_terminal(frame: &Value) -> bool {
        frame["type"] == "event" && (frame["subtype"] == "finished" || frame["subtype"] == "error")
    }

    #[tokio::test]
    async fn test_start_conflict_and_no_active_run() {
        let fx = fixture();
        let (mut conn, mut rx) = session(&fx.runner);

        conn.handle_text(r#"{"action_type":"start","cfg":{"label":"y","train_path":"/data/t.csv"}}"#)
            .await;
        let reply = next_frame(&mut rx).await;
        assert_eq!(reply["status"], "success");
        let run_id = RunId::new(reply["run_id"].as_str().unwrap());
        assert_eq!(conn.current_run().await, Some(run_id.clone()));

        conn.handle_text(r#"{"action_type":"start","cfg":{}}"#).await;
        let frames = frames_until(&mut rx, |f| f["status"] == "error").await;
        let conflict = frames.last().unwrap();
        assert_eq!(conflict["code"], "conflict");
        assert!(conflict["detail"]
            .as_str()
            .unwrap()
            .contains("already in progress"));

        let (mut fresh, mut fresh_rx) = session(&fx.runner);
        fresh.handle_text(r#"{"action_type":"status"}"#).await;
        let reply = next_frame(&mut fresh_rx).await;
        assert_eq!(reply["status"], "error");
        assert_eq!(reply["code"], "no_active_run");
        assert_eq!(reply["detail"], "no active run");

        fx.release.send(()).unwrap();
        let frames = frames_until(&mut rx, is_terminal).await;
        assert_eq!(frames.last().unwrap()["subtype"], "finished");
        assert!(frames.iter().all(|f| f["subtype"] != "eof"));
    }

    #[tokio::test]
    async fn test_event_stream_and_status() {
        let fx = fixture();
        let (mut conn, mut rx) = session(&fx.runner);

        conn.handle_text(r#"{"action_type":"start","cfg":{"label":"fail","train_df":[[1]]}}"#)
            .await;
        let reply = next_frame(&mut rx).await;
        let run_id = reply["run_id"].as_str().unwrap().to_string();

        fx.release.send(()).unwrap();
        let frames = frames_until(&mut rx, is_terminal).await;
        assert_eq!(frames[0]["subtype"], "state");
        assert_eq!(frames[0]["state"], "running");
        assert!(frames.iter().all(|f| f["run_id"] == run_id.as_str()));
        let last = frames.last().unwrap();
        assert_eq!(last["subtype"], "error");
        assert_eq!(last["error"], "disk full");

        // Wait for the drain loop to observe the end of stream.
        for _ in 0..200 {
            if conn.current_run().await.is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(conn.current_run().await, None);

        conn.handle_text(&format!(r#"{{"action_type":"status","run_id":"{}"}}"#, run_id))
            .await;
        let reply = next_frame(&mut rx).await;
        assert_eq!(reply["status"], "success");
        assert_eq!(reply["run"]["state"], "error");
        assert_eq!(reply["run"]["error"], "disk full");
        assert_eq!(reply["run"]["active"], false);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_does_not_stop_the_run() {
        let fx = fixture();
        let (mut conn, mut rx) = session(&fx.runner);
        conn.handle_text(r#"{"action_type":"start","cfg":{"label":"y","train_path":"/d.csv"}}"#)
            .await;
        let run_id = next_frame(&mut rx).await["run_id"]
            .as_str()
            .unwrap()
            .to_string();
        drop(conn);
        drop(rx);
        assert!(matches!(
            fx.runner.take_progress(&RunId::new(run_id.as_str())),
            Err(RunnerError::StreamTaken(_))
        ));

        fx.release.send(()).unwrap();
        let (mut fresh, mut fresh_rx) = session(&fx.runner);
        let status = format!(r#"{{"action_type":"status","run_id":"{}"}}"#, run_id);
        let mut state = Value::Null;
        for _ in 0..200 {
            fresh.handle_text(&status).await;
            let reply = next_frame(&mut fresh_rx).await;
            state = reply["run"]["state"].clone();
            if state == "finished" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(state, "finished");
    }

    #[tokio::test]
    async fn test_stale_drain_keeps_newer_current_run() {
        let fx = fixture();
        let (mut conn, mut rx) = session(&fx.runner);
        let start = r#"{"action_type":"start","cfg":{"label":"y","train_path":"/d.csv"}}"#;

        conn.handle_text(start).await;
        let first = next_frame(&mut rx).await["run_id"]
            .as_str()
            .unwrap()
            .to_string();

        // Let the first run end while its drain has not been polled yet:
        // the test never yields until the second run is started.
        fx.release.send(()).unwrap();
        for _ in 0..500 {
            if !fx.runner.is_active() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(!fx.runner.is_active());

        conn.handle_text(start).await;
        let frames = frames_until(&mut rx, |f| f["status"] == "success").await;
        let second = frames.last().unwrap()["run_id"]
            .as_str()
            .unwrap()
            .to_string();
        assert_ne!(first, second);

        frames_until(&mut rx, |f| is_terminal(f) && f["run_id"] == first.as_str()).await;
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(conn.current_run().await, Some(RunId::new(second.as_str())));

        fx.release.send(()).unwrap();
        frames_until(&mut rx, |f| is_terminal(f) && f["run_id"] == second.as_str()).await;
        for _ in 0..200 {
            if conn.current_run().await.is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(conn.current_run().await, None);
    }

    #[tokio::test]
    async fn test_errors_keep_the_session_usable() {
        let fx = fixture();
        let (mut conn, mut rx) = session(&fx.runner);

        conn.handle_text("{{{").await;
        let frame = next_frame(&mut rx).await;
        assert_eq!(frame["type"], "error");
        assert_eq!(frame["code"], "bad_message");

        conn.handle_text(r#"{"action_type":"teleport"}"#).await;
        let frame = next_frame(&mut rx).await;
        assert_eq!(frame["status"], "error");
        assert_eq!(frame["code"], "unknown_action");

        conn.handle_text(r#"{"action_type":"start","cfg":{"train_path":"/d.csv"}}"#)
            .await;
        let frame = next_frame(&mut rx).await;
        assert_eq!(frame["code"], "validation_error");
        assert!(frame["detail"].as_str().unwrap().contains("label"));

        conn.handle_text(r#"{"action_type":"start","cfg":[1,2]}"#).await;
        assert_eq!(next_frame(&mut rx).await["code"], "validation_error");

        conn.handle_text(r#"{"action_type":"status","run_id":"missing"}"#)
            .await;
        assert_eq!(next_frame(&mut rx).await["code"], "run_not_found");

        conn.handle_text(r#"{"action_type":"cancel"}"#).await;
        assert_eq!(next_frame(&mut rx).await["code"], "no_active_run");

        for action in ["pause", "resume", "restart"] {
            conn.handle_text(&format!(r#"{{"action_type":"{}"}}"#, action))
                .await;
            let frame = next_frame(&mut rx).await;
            assert_eq!(frame["status"], "error");
            assert_eq!(frame["code"], "unsupported");
        }
        assert!(!fx.runner.is_active());
    }

    #[tokio::test]
    async fn test_cancel_is_reported_as_unsupported() {
        let fx = fixture();
        let (mut conn, mut rx) = session(&fx.runner);
        conn.handle_text(r#"{"action_type":"start","cfg":{"label":"y","train_path":"/d.csv"}}"#)
            .await;
        next_frame(&mut rx).await;

        conn.handle_text(r#"{"action_type":"cancel"}"#).await;
        let frames = frames_until(&mut rx, |f| f["status"] == "error").await;
        assert_eq!(frames.last().unwrap()["code"], "unsupported");
        assert!(fx.runner.is_active());

        fx.release.send(()).unwrap();
        frames_until(&mut rx, is_terminal).await;
    }
}
