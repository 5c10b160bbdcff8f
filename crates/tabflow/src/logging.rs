//! Process-wide log output.
//!
//! Library code logs through the `log` facade and `tracing` spans; the
//! binary calls [`init`] once to route both into a `tracing-subscriber`
//! formatter.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::error::LoggingError;

/// Builds the filter from `RUST_LOG` when set, otherwise from `level`
/// (any `EnvFilter` directive, e.g. `info` or `tabflow=debug,warn`).
pub fn filter(level: &str) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level).map_err(|e| LoggingError::Filter {
        filter: level.to_string(),
        reason: e.to_string(),
    })
}

/// Installs the global subscriber and the `log` bridge.
pub fn init(level: &str, json: bool) -> Result<(), LoggingError> {
    let filter = filter(level)?;

    let installed = if json {
        let subscriber = Registry::default().with(filter).with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_thread_names(true),
        );
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let subscriber = Registry::default()
            .with(filter)
            .with(fmt::layer().with_target(false).with_thread_names(true));
        tracing::subscriber::set_global_default(subscriber)
    };
    installed.map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    tracing_log::LogTracer::init().map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;
    Ok(())
}
