//! Tracing subscriber setup with optional rotating file output.
//!
//! Console output always goes to stderr: with the stdio transport, stdout
//! carries MCP frames.

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{self, RollingFileAppender};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LoggingConfig, Rotation};

/// Logging setup failure.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("cannot create log directory {path}: {source}")]
    Directory {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot open log file: {0}")]
    Appender(#[from] rolling::InitError),

    #[error("global subscriber already set: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Keeps the non-blocking file writer flushing until dropped.
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber.
pub fn init(config: &LoggingConfig, verbose: bool) -> Result<LogGuard, LoggingError> {
    let default_level = if verbose { "debug" } else { config.level.as_str() };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let console = config
        .console
        .then(|| fmt::layer().with_writer(std::io::stderr).with_target(true));

    let (file, guard) = match &config.file_path {
        Some(path) => {
            let appender = file_appender(path, config.rotation, config.max_files)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()?;

    Ok(LogGuard { _file: guard })
}

/// Build a rolling appender for `path`, creating its directory.
///
/// `logs/server.log` rotates to `logs/server.<date>.log`.
pub fn file_appender(
    path: &Path,
    rotation: Rotation,
    max_files: usize,
) -> Result<RollingFileAppender, LoggingError> {
    let (directory, prefix, suffix) = split_log_path(path);

    std::fs::create_dir_all(&directory).map_err(|source| LoggingError::Directory {
        path: directory.clone(),
        source,
    })?;

    let mut builder = RollingFileAppender::builder()
        .rotation(appender_rotation(rotation))
        .filename_prefix(prefix)
        .max_log_files(max_files);
    if let Some(suffix) = suffix {
        builder = builder.filename_suffix(suffix);
    }

    Ok(builder.build(directory)?)
}

fn appender_rotation(rotation: Rotation) -> rolling::Rotation {
    match rotation {
        Rotation::Minutely => rolling::Rotation::MINUTELY,
        Rotation::Hourly => rolling::Rotation::HOURLY,
        Rotation::Daily => rolling::Rotation::DAILY,
        Rotation::Never => rolling::Rotation::NEVER,
    }
}

/// Split a log path into (directory, file stem, extension).
fn split_log_path(path: &Path) -> (PathBuf, String, Option<String>) {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let prefix = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "ollama-memory".to_string());
    let suffix = path
        .extension()
        .map(|s| s.to_string_lossy().into_owned());

    (directory, prefix, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_log_path() {
        let (dir, prefix, suffix) = split_log_path(Path::new("logs/server.log"));
        assert_eq!(dir, PathBuf::from("logs"));
        assert_eq!(prefix, "server");
        assert_eq!(suffix.as_deref(), Some("log"));
    }

    #[test]
    fn test_split_bare_file_name() {
        let (dir, prefix, suffix) = split_log_path(Path::new("memory"));
        assert_eq!(dir, PathBuf::from("."));
        assert_eq!(prefix, "memory");
        assert!(suffix.is_none());
    }

    #[test]
    fn test_file_appender_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("memory.log");

        let appender = file_appender(&path, Rotation::Never, 3);
        assert!(appender.is_ok());
        assert!(tmp.path().join("nested").is_dir());
    }
}
