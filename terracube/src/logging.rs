//! Logging infrastructure for the ingestion engine.
//!
//! Structured logging via `tracing`, with dual output:
//! - a non-blocking file appender under the ingest log directory
//! - stdout, for driver processes run interactively
//!
//! Verbosity is controlled by `RUST_LOG`, defaulting to `info`.

use std::fs;
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Guard that must be kept alive for the duration of logging.
///
/// Dropping this guard flushes and closes the log file writer.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Initializes the logging system.
///
/// Creates the log directory if needed and sets up file plus stdout
/// output. Call once per process, before the first transaction.
///
/// # Arguments
///
/// * `log_dir` - Directory for log files (e.g., "logs")
/// * `log_file` - Log filename (e.g., "ingest.log")
///
/// # Errors
///
/// Returns an error if the log directory cannot be created.
pub fn init_logging(log_dir: &str, log_file: &str) -> Result<LoggingGuard, io::Error> {
    fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, log_file);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .compact();

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_ansi(true)
        .compact();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// Default log directory path.
pub fn default_log_dir() -> &'static str {
    "logs"
}

/// Default log file name.
pub fn default_log_file() -> &'static str {
    "ingest.log"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_default_paths() {
        assert_eq!(default_log_dir(), "logs");
        assert_eq!(default_log_file(), "ingest.log");
    }

    #[test]
    fn test_log_directory_creation() {
        // init_logging itself cannot run twice per process (global
        // subscriber), so only the directory handling is unit-tested here.
        let dir = tempfile::tempdir().unwrap();
        let nested: PathBuf = dir.path().join("deep").join("logs");
        fs::create_dir_all(&nested).unwrap();
        assert!(nested.exists());

        let log_path = Path::new(&nested).join("ingest.log");
        fs::write(&log_path, "").unwrap();
        assert!(log_path.exists());
    }
}
