use std::io::{self, IsTerminal};
use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::TelemetryError;

static TRACING_INITIALISED: OnceLock<Result<(), TelemetryError>> = OnceLock::new();

/// Initialises structured logging: pretty output on interactive terminals,
/// JSON lines otherwise. Safe to call more than once.
pub(crate) fn initialise_tracing(
    level_override: Option<LevelFilter>,
) -> Result<(), &'static TelemetryError> {
    TRACING_INITIALISED
        .get_or_init(|| initialise_tracing_once(level_override))
        .as_ref()
        .copied()
}

fn initialise_tracing_once(level_override: Option<LevelFilter>) -> Result<(), TelemetryError> {
    let log_filter = match level_override {
        Some(level) => EnvFilter::default().add_directive(level.into()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };

    if io::stderr().is_terminal() {
        tracing_subscriber::registry()
            .with(log_filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(false)
                    .with_writer(io::stderr),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(log_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(false)
                    .with_writer(io::stderr),
            )
            .try_init()?;
    }

    Ok(())
}
