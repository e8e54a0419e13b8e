use crate::config::Config;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialise the process-wide subscriber. The returned guard must be held
/// until exit so buffered file output is flushed.
pub fn init(config: &Config) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    let registry = tracing_subscriber::registry().with(filter);
    let stdout_layer = fmt::layer().with_target(false);

    match &config.log_file {
        Some(log_file) => {
            let file_appender = tracing_appender::rolling::daily(&config.log_dir, log_file);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = fmt::layer()
                .json()
                .with_target(true)
                .with_writer(non_blocking)
                .with_ansi(false);
            registry.with(stdout_layer).with(file_layer).init();
            Some(guard)
        }
        None => {
            registry.with(stdout_layer).init();
            None
        }
    }
}
