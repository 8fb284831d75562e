//! Logging for window processes.
//!
//! Console output plus a daily-rolling file under `~/.raidclock/logs`.
//! `RAIDCLOCK_LOG` overrides the filter (e.g. `raidclock_window=debug`).

use raidclock_core::storage::StorageConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const LOG_ENV: &str = "RAIDCLOCK_LOG";
const DEFAULT_FILTER: &str = "info";

/// Installs the global subscriber. Keep the returned guard alive until exit so
/// buffered file output is flushed.
pub fn init(storage: &StorageConfig, file_prefix: &str) -> Option<WorkerGuard> {
    let filter = || {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(filter());

    let log_dir = storage.logs_dir();
    let (file_layer, guard) = match fs_err::create_dir_all(&log_dir) {
        Ok(()) => {
            let appender = RollingFileAppender::new(
                Rotation::DAILY,
                &log_dir,
                format!("{}.log", file_prefix),
            );
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_ids(true)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        Err(err) => {
            eprintln!("Warning: failed to create log directory: {}", err);
            (None, None)
        }
    };

    let _ = tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init();
    guard
}
