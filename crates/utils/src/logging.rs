//! provides logging helpers

use std::env;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

/// Environment variable pointing at a log file or directory.
pub const LOG_PATH_ENV_VAR: &str = "LOG_PATH";

const DEFAULT_LOG_PREFIX: &str = "inplace-update.log";

fn env_filter() -> filter::EnvFilter {
    filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy()
}

/// Splits a log path into the rotation directory and the file name prefix.
fn rotation_target(log_path: &Path) -> (&Path, &str) {
    if log_path.is_dir() {
        return (log_path, DEFAULT_LOG_PREFIX);
    }
    let parent = log_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let prefix = log_path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(DEFAULT_LOG_PREFIX);
    (parent, prefix)
}

/// initiate the global tracing subscriber
///
/// Logs go to stderr unless [`LOG_PATH_ENV_VAR`] is set, in which case they are
/// written to a daily rotated file. The returned guard must be held for the
/// lifetime of the process so buffered lines are flushed.
pub fn init() -> Option<WorkerGuard> {
    let Some(log_path) = env::var(LOG_PATH_ENV_VAR).ok() else {
        init_stderr();
        return None;
    };

    let (rotation_dir, prefix) = rotation_target(Path::new(&log_path));
    match RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(3)
        .build(rotation_dir)
    {
        Ok(appender) => {
            let (file_writer, file_guard) = tracing_appender::non_blocking(appender);
            let fmt_layer = layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(true)
                .with_filter(env_filter());
            registry().with(fmt_layer).init();
            Some(file_guard)
        }
        Err(err) => {
            init_stderr();
            tracing::error!(
                "failed to create rolling file appender at {}: {err}; falling back to stderr",
                rotation_dir.display()
            );
            None
        }
    }
}

fn init_stderr() {
    let fmt_layer = layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(env_filter());

    registry().with(fmt_layer).init();
}
