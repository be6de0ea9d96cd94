use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{NexaError, Result};

const MAX_LOG_FILES: usize = 7; // Keep 7 days of logs
const LOG_ROTATION_INTERVAL: Duration = Duration::from_secs(86400);
const LOG_FILE_PREFIX: &str = "nexa-clusters";

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global subscriber: a console layer plus, when enabled, a JSON
/// file layer rotated daily. Keep the returned guard alive to flush the file.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let console = config.console.then(|| {
        fmt::Layer::new()
            .with_target(true)
            .with_thread_ids(true)
            .with_ansi(true)
            .with_filter(filter(&config.level))
    });

    let (file, guard) = if config.file {
        fs::create_dir_all(&config.directory)?;
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(LOG_FILE_PREFIX)
            .filename_suffix("log")
            .build(&config.directory)
            .map_err(|e| NexaError::Config(format!("Failed to create log appender: {}", e)))?;
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::Layer::new()
            .json()
            .with_writer(writer)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_target(true)
            .with_ansi(false)
            .with_filter(filter(&config.level));
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| NexaError::Config(format!("Failed to set tracing subscriber: {}", e)))?;

    Ok(guard)
}

/// Periodically prune rotated log files. Must be called inside a tokio runtime.
pub fn spawn_log_cleanup(log_dir: PathBuf) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(LOG_ROTATION_INTERVAL);
        loop {
            interval.tick().await;
            let removed = cleanup_old_logs(&log_dir, MAX_LOG_FILES);
            if removed > 0 {
                tracing::debug!("Removed {} old log files from {}", removed, log_dir.display());
            }
        }
    })
}

/// Remove all but the newest `keep` log files, returning how many were removed.
pub fn cleanup_old_logs(log_dir: &Path, keep: usize) -> usize {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return 0;
    };
    let mut log_files: Vec<_> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .starts_with(LOG_FILE_PREFIX)
        })
        .collect();

    // Newest first
    log_files.sort_by_key(|entry| {
        std::cmp::Reverse(
            entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH),
        )
    });

    log_files
        .iter()
        .skip(keep)
        .filter(|old| fs::remove_file(old.path()).is_ok())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        for day in 1..=4 {
            let path = dir.path().join(format!("{}.2026-01-0{}.log", LOG_FILE_PREFIX, day));
            fs::write(&path, "x").unwrap();
        }
        fs::write(dir.path().join("unrelated.txt"), "x").unwrap();

        assert_eq!(cleanup_old_logs(dir.path(), 2), 2);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 3);
    }

    #[test]
    fn test_cleanup_missing_dir() {
        assert_eq!(cleanup_old_logs(Path::new("/nonexistent/nexa-clusters-logs"), 1), 0);
    }
}
