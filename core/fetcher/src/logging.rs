//! Logging setup.
//!
//! Always logs to stderr. When a log file is configured, lines are also
//! appended to it (no ANSI) through a non-blocking writer: a slow or full disk
//! drops lines instead of stalling the poll loop.

use std::env;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const DEBUG_ENV: &str = "FETCHER_DEBUG_LOG";

/// The returned guard flushes buffered file lines on drop; keep it alive for
/// the life of the process.
pub fn init(log_file: Option<&Path>) -> Option<WorkerGuard> {
    let (file_layer, guard) = match log_file.and_then(open_appender) {
        Some(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let result = tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init();
    if let Err(err) = result {
        eprintln!("[ap-fetcher] Failed to initialize logging: {}", err);
    }

    guard
}

fn env_filter() -> EnvFilter {
    let debug_enabled = env::var(DEBUG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

fn open_appender(path: &Path) -> Option<RollingFileAppender> {
    let Some(file_name) = path.file_name() else {
        eprintln!("[ap-fetcher] Log path has no file name: {}", path.display());
        return None;
    };
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    match RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name.to_string_lossy().into_owned())
        .build(dir)
    {
        Ok(appender) => Some(appender),
        Err(err) => {
            eprintln!(
                "[ap-fetcher] Failed to open log file {}: {}",
                path.display(),
                err
            );
            None
        }
    }
}
