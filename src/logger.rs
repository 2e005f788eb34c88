use snafu::ResultExt;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{registry, EnvFilter};

use crate::config::Config;
use crate::error::{ApplicationError, InitializeLoggerSnafu};

/// Install the global subscriber. The returned guard flushes the log file when dropped,
/// keep it alive until the process exits.
pub fn init(config: &Config) -> Result<Option<WorkerGuard>, ApplicationError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match &config.log_dir {
        Some(log_dir) => {
            let file_appender = tracing_appender::rolling::daily(log_dir, "mamba-scraper.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let layer = layer().with_ansi(false).json().with_writer(non_blocking);

            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_layer = layer().pretty().with_writer(std::io::stdout);

    registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context(InitializeLoggerSnafu)?;

    Ok(guard)
}
