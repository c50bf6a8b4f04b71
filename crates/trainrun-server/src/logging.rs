//! Process-wide tracing setup.

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;
use trainrun_runner::LogBridge;

use crate::error::ServerError;

/// Install the console layer and the run log bridge.
///
/// `RUST_LOG` overrides `default_filter` for the console only; the bridge
/// applies its own level so run streams do not depend on console verbosity.
pub fn init(default_filter: &str, bridge: LogBridge) -> Result<(), ServerError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_filter(filter),
        )
        .with(bridge)
        .try_init()?;
    Ok(())
}
