//! HTTP request handlers.

mod health;
mod runs;

pub use health::health_check;
pub use runs::{get_run, list_runs, run_summary};
