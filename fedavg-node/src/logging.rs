//! Tracing subscriber setup for the client binary

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{NodeError, Result};

/// Default filter directive for a verbosity level.
///
/// `RUST_LOG` always wins over this.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(verbosity: u8) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_line_number(false)
                .with_timer(fmt::time::uptime()),
        )
        .with(filter)
        .try_init()
        .map_err(|e| NodeError::Logging(e.to_string()))
}
