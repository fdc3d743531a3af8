use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Base name of the daily log files.
const LOG_FILE_PREFIX: &str = "server_pricewatch";
const LOG_FILE_SUFFIX: &str = "log";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Installs the global subscriber: a console layer plus a JSON layer writing
/// to a daily file under `log_dir`.
///
/// `RUST_LOG` takes precedence over `log_level`. The returned guard flushes
/// the file writer when dropped, so it has to live until the end of `main`.
pub fn setup_logging(log_dir: &Path, log_level: &str) -> Result<WorkerGuard> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir).with_context(|| format!("failed to create log directory {}", log_dir.display()))?;
    }

    // Clean up old log files, keeping only the most recent one
    let removed = cleanup_old_logs(log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix(LOG_FILE_SUFFIX)
        .build(log_dir)
        .context("failed to open the log file")?;
    let (non_blocking_appender, guard) = tracing_appender::non_blocking(file_appender);

    let console_layer = fmt::layer()
        .with_target(true)
        .with_ansi(true)
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()));

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_writer(non_blocking_appender)
        .json();

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .with_context(|| format!("invalid log level '{log_level}'"))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    tracing::info!(log_dir = %log_dir.display(), log_level, removed, "Logging initialized");
    Ok(guard)
}

/// Deletes every `.log` file in `log_dir` except the most recently modified.
/// Returns how many were removed.
pub fn cleanup_old_logs(log_dir: &Path) -> Result<usize> {
    let mut entries: Vec<_> = fs::read_dir(log_dir)?
        .filter_map(|res| res.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == LOG_FILE_SUFFIX))
        .filter_map(|e| {
            let modified = e.metadata().and_then(|m| m.modified()).ok()?;
            Some((modified, e.path()))
        })
        .collect();

    // Sort by modification time, newest first
    entries.sort_by(|a, b| b.0.cmp(&a.0));

    let mut removed = 0;
    for (_, path) in entries.iter().skip(1) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Failed to delete old log file {}: {}", path.display(), e),
        }
    }

    Ok(removed)
}
