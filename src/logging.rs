use std::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingSettings;
use crate::error::{PipelineError, Result};

/// Initializes file logging (daily rolling, JSON lines) and optional console
/// output. `RUST_LOG` overrides the configured filter.
///
/// Keep the returned guard alive until exit so buffered lines are flushed.
pub fn init_logging(settings: &LoggingSettings) -> Result<WorkerGuard> {
    fs::create_dir_all(&settings.dir)?;

    let file_appender = tracing_appender::rolling::daily(&settings.dir, &settings.file_prefix);
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_writer);

    let console_layer = settings.console.then(|| {
        fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
    });

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.filter))
        .map_err(|e| PipelineError::Config(format!("logging.filter '{}': {}", settings.filter, e)))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| PipelineError::Config(format!("logging already initialised: {e}")))?;

    Ok(guard)
}
