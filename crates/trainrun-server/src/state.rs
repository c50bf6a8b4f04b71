//! Shared application state.

use std::sync::Arc;

use trainrun_runner::JobRunner;

/// Shared application state.
pub struct AppState {
    /// The one runner every connection drives.
    pub runner: Arc<JobRunner>,
}

impl AppState {
    /// Create a new AppState wrapped in Arc.
    pub fn new(runner: Arc<JobRunner>) -> Arc<Self> {
        Arc::new(Self { runner })
    }
}
