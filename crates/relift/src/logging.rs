//! Tracing initialization for binaries and long-lived test harnesses.
//!
//! The engine itself only emits: `tracing` spans/events on the pipeline
//! paths and `log` records in the database layer. This installs a
//! subscriber for both; `log` records are bridged into `tracing` so one
//! filter covers everything.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Failed to install log bridge: {0}")]
    LogBridge(#[from] log::SetLoggerError),

    #[error("Failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Installs the global tracing subscriber. `RUST_LOG` overrides
/// `default_filter`. Call once at startup; a second call fails.
pub fn init_tracing(default_filter: &str) -> Result<(), LoggingError> {
    tracing_log::LogTracer::init()?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
