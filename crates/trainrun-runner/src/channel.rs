//! Per-run event channel.
//!
//! Multi-producer, single-consumer and unbounded: the worker thread, the log
//! bridge and the log tailer push from their own contexts while exactly one
//! consumer drains. Pushing never blocks and never needs a runtime, so it is
//! safe from plain OS threads and from inside a tracing layer.

use tokio::sync::mpsc;
use trainrun_core::{RunEvent, RunId};

/// Create a fresh channel scoped to one run.
pub fn event_channel(run_id: RunId) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { run_id, tx }, EventReceiver { rx })
}

/// Producer half. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventSender {
    run_id: RunId,
    tx: mpsc::UnboundedSender<RunEvent>,
}

impl EventSender {
    /// The run this channel belongs to.
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Push an event. Returns false if the consumer is gone.
    pub fn send(&self, event: RunEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Consumer half.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<RunEvent>,
}

impl EventReceiver {
    /// Wait for the next event; `None` once every sender is dropped.
    pub async fn recv(&mut self) -> Option<RunEvent> {
        self.rx.recv().await
    }

    /// Pop an already-queued event without waiting.
    pub fn try_recv(&mut self) -> Option<RunEvent> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_push_order_is_preserved_across_threads() {
        let (tx, mut rx) = event_channel(RunId::new("r1"));

        let worker_tx = tx.clone();
        std::thread::spawn(move || {
            for i in 0..100 {
                worker_tx.send(RunEvent::tail(RunId::new("r1"), i.to_string()));
            }
        })
        .join()
        .unwrap();
        drop(tx);

        let mut seen = Vec::new();
        while let Some(RunEvent::Log { msg, .. }) = rx.recv().await {
            seen.push(msg.parse::<u32>().unwrap());
        }
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_send_after_consumer_dropped() {
        let (tx, rx) = event_channel(RunId::new("r1"));
        assert_eq!(tx.run_id().as_str(), "r1");
        drop(rx);
        assert!(!tx.send(RunEvent::Eof {
            run_id: RunId::new("r1")
        }));
    }
}
