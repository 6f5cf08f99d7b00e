//! Tracing integration for structured logging.
//!
//! One entry point for the server binary and embedders: verbosity mapped
//! to a level filter (overridable via `RUST_LOG`), text or JSON output,
//! stderr or file destination.

use std::path::Path;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::Result;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// Structured JSON output.
    Json,
}

/// Initialize the logging system.
///
/// `verbosity` maps 0=error, 1=warn, 2=info, 3=debug, 4+=trace. A
/// `RUST_LOG` environment variable overrides the computed filter.
pub fn init_logging(verbosity: u8, log_file: Option<&Path>, format: LogFormat) -> Result<()> {
    let level = match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("radb_core={level},radb_server={level}")));

    let layer = match (log_file, format) {
        (None, LogFormat::Text) => fmt::layer()
            .with_target(true)
            .with_file(verbosity >= 3)
            .with_line_number(verbosity >= 3)
            .boxed(),
        (None, LogFormat::Json) => fmt::layer().json().boxed(),
        (Some(path), LogFormat::Text) => {
            let file = open_log_file(path)?;
            fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .with_target(true)
                .with_file(verbosity >= 3)
                .with_line_number(verbosity >= 3)
                .boxed()
        }
        (Some(path), LogFormat::Json) => {
            let file = open_log_file(path)?;
            fmt::layer().json().with_writer(file).boxed()
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| crate::Error::Io(std::io::Error::other(e.to_string())))
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    Ok(std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?)
}

/// Initialize logging with defaults for testing. Silently ignores errors
/// (logging may already be initialized).
pub fn init_test_logging() {
    let _ = init_logging(2, None, LogFormat::Text);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_default() {
        assert_eq!(LogFormat::default(), LogFormat::Text);
    }

    #[test]
    fn init_is_idempotent_enough_for_tests() {
        init_test_logging();
        init_test_logging();
    }
}
