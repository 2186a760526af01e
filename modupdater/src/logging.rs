//! Logging setup.
//!
//! Logs go to `update.log` in the configured directory through a
//! non-blocking writer; the previous run's log is removed first so the file
//! only ever describes the latest attempt. An optional stderr layer mirrors
//! the output for interactive use.

use std::fs;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::{ConfigError, LoggingConfig};

/// Name of the log file inside the log directory.
pub const LOG_FILE_NAME: &str = "update.log";

/// Keeps the background log writer alive.
///
/// Dropping it flushes pending log lines; hold it until the process exits.
#[must_use = "logs are lost if the guard is dropped early"]
pub struct LoggingGuard {
    _file: WorkerGuard,
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the configured level when set.
///
/// # Arguments
///
/// * `config` - log directory, file prefix and level
/// * `to_stderr` - also print human-readable logs to stderr
///
/// # Errors
///
/// Returns an error if the log directory cannot be created.
pub fn init(config: &LoggingConfig, to_stderr: bool) -> Result<LoggingGuard, ConfigError> {
    fs::create_dir_all(&config.directory).map_err(|source| ConfigError::Write {
        path: config.directory.clone(),
        source,
    })?;

    let log_path = config.directory.join(LOG_FILE_NAME);
    if log_path.exists() {
        fs::remove_file(&log_path).ok();
    }

    let file_appender = tracing_appender::rolling::never(&config.directory, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_timer(LocalTime::rfc_3339())
        .with_target(true);

    let stderr_layer = to_stderr.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_timer(LocalTime::rfc_3339())
            .with_target(false)
            .boxed()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| ConfigError::Logging(e.to_string()))?;

    Ok(LoggingGuard { _file: guard })
}
