//! Bridge from `tracing` records to a run's event channel.
//!
//! [`LogBridge`] is a `tracing_subscriber::Layer` that is part of the process
//! subscriber for its whole life. A run subscribes to it with
//! [`LogBridge::install`]; every record seen while the returned
//! [`BridgeGuard`] is alive becomes a `log` event on that run's channel,
//! pushed from whichever thread emitted the record.
//!
//! `on_event` must never log itself: that would re-enter the layer while the
//! subscriber list is locked.

use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;
use trainrun_core::RunEvent;

use crate::channel::EventSender;

/// Targets whose records are never bridged: the runner's and server's own
/// bookkeeping, and the HTTP stack.
pub const DEFAULT_IGNORED_TARGETS: &[&str] = &[
    "trainrun_runner",
    "trainrun_server",
    "tower_http",
    "axum",
    "hyper",
    "tokio",
];

#[derive(Debug)]
struct Subscription {
    id: u64,
    sender: EventSender,
}

/// Layer forwarding log records into the channels of subscribed runs.
#[derive(Debug, Clone)]
pub struct LogBridge {
    min_level: Level,
    ignored_targets: Arc<[String]>,
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
    next_id: Arc<AtomicU64>,
}

impl Default for LogBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl LogBridge {
    /// Bridge records at INFO and above, skipping [`DEFAULT_IGNORED_TARGETS`].
    pub fn new() -> Self {
        Self {
            min_level: Level::INFO,
            ignored_targets: DEFAULT_IGNORED_TARGETS
                .iter()
                .map(|t| t.to_string())
                .collect(),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Set the least severe level that is still bridged.
    pub fn with_min_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }

    /// Replace the list of ignored target prefixes.
    pub fn with_ignored_targets<I, T>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.ignored_targets = targets.into_iter().map(Into::into).collect();
        self
    }

    /// Subscribe a run's channel until the guard is dropped.
    pub fn install(&self, sender: EventSender) -> BridgeGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push(Subscription { id, sender });
        BridgeGuard {
            id,
            subscriptions: Arc::clone(&self.subscriptions),
        }
    }

    /// Number of runs currently subscribed.
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Subscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn is_ignored(&self, target: &str) -> bool {
        self.ignored_targets.iter().any(|prefix| {
            target == prefix
                || target
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with("::"))
        })
    }
}

impl<S: Subscriber> Layer<S> for LogBridge {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        // Higher tracing levels are more verbose.
        if *meta.level() > self.min_level || self.is_ignored(meta.target()) {
            return;
        }

        let subscriptions = self.lock();
        if subscriptions.is_empty() {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let msg = visitor.finish();
        let level = meta.level().to_string().to_ascii_lowercase();

        for sub in subscriptions.iter() {
            sub.sender.send(RunEvent::log(
                sub.sender.run_id().clone(),
                meta.target(),
                level.clone(),
                msg.clone(),
            ));
        }
    }
}

/// Keeps a run subscribed to the bridge. Dropping it unsubscribes.
#[derive(Debug)]
#[must_use = "the run is unsubscribed as soon as the guard is dropped"]
pub struct BridgeGuard {
    id: u64,
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
}

impl Drop for BridgeGuard {
    fn drop(&mut self) {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|sub| sub.id != self.id);
    }
}

/// Renders `message` followed by the remaining fields as `key=value`.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        match (self.message.is_empty(), self.fields.is_empty()) {
            (_, true) => self.message,
            (true, false) => self.fields,
            (false, false) => format!("{} {}", self.message, self.fields),
        }
    }

    fn push_field(&mut self, field: &Field, value: fmt::Arguments<'_>) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={}", field.name(), value);
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.push_field(field, format_args!("{}", value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.push_field(field, format_args!("{:?}", value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::event_channel;
    use tracing_subscriber::prelude::*;
    use trainrun_core::RunId;

    fn with_bridge<F: FnOnce()>(bridge: &LogBridge, f: F) {
        let subscriber = tracing_subscriber::registry().with(bridge.clone());
        tracing::subscriber::with_default(subscriber, f);
    }

    #[test]
    fn test_records_are_bridged_while_installed() {
        let bridge = LogBridge::new();
        let (tx, mut rx) = event_channel(RunId::new("r1"));

        with_bridge(&bridge, || {
            tracing::info!(target: "trainer", "before install");
            let guard = bridge.install(tx);
            tracing::info!(target: "trainer", epoch = 3, "fit: start");
            tracing::debug!(target: "trainer", "too verbose");
            drop(guard);
            tracing::info!(target: "trainer", "after uninstall");
        });

        let event = rx.try_recv().unwrap();
        assert_eq!(
            event,
            RunEvent::log(RunId::new("r1"), "trainer", "info", "fit: start epoch=3")
        );
        assert!(rx.try_recv().is_none());
        assert_eq!(bridge.subscriber_count(), 0);
    }

    #[test]
    fn test_records_from_other_threads_are_bridged() {
        let bridge = LogBridge::new();
        let (tx, mut rx) = event_channel(RunId::new("r1"));
        let _guard = bridge.install(tx);

        let subscriber = tracing_subscriber::registry().with(bridge.clone());
        let dispatch = tracing::Dispatch::new(subscriber);
        std::thread::spawn(move || {
            tracing::dispatcher::with_default(&dispatch, || {
                tracing::warn!(target: "trainer", "from worker");
            });
        })
        .join()
        .unwrap();

        match rx.try_recv() {
            Some(RunEvent::Log { level, msg, .. }) => {
                assert_eq!(level.as_deref(), Some("warn"));
                assert_eq!(msg, "from worker");
            }
            other => panic!("expected log event, got {:?}", other),
        }
    }

    #[test]
    fn test_ignored_targets() {
        let bridge = LogBridge::new().with_ignored_targets(["noisy"]);
        let (tx, mut rx) = event_channel(RunId::new("r1"));

        with_bridge(&bridge, || {
            let _guard = bridge.install(tx);
            tracing::info!(target: "noisy", "skipped");
            tracing::info!(target: "noisy::inner", "skipped");
            tracing::info!(target: "noisy_neighbour", "kept");
        });

        match rx.try_recv() {
            Some(RunEvent::Log { logger, .. }) => {
                assert_eq!(logger.as_deref(), Some("noisy_neighbour"))
            }
            other => panic!("expected log event, got {:?}", other),
        }
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_min_level() {
        let bridge = LogBridge::new().with_min_level(Level::DEBUG);
        let (tx, mut rx) = event_channel(RunId::new("r1"));

        with_bridge(&bridge, || {
            let _guard = bridge.install(tx);
            tracing::debug!(target: "trainer", "now visible");
            tracing::trace!(target: "trainer", "still hidden");
        });

        assert!(rx.try_recv().is_some());
        assert!(rx.try_recv().is_none());
    }
}
