//! Tracing subscriber setup for applications embedding the client.
//!
//! The `CBPP_LOG` environment variable takes `EnvFilter` directives and wins
//! over the level passed in.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::error::ClientError;

pub const LOG_ENV: &str = "CBPP_LOG";

fn filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Installs a stderr subscriber.
pub fn init_tracing(level: Level) -> Result<(), ClientError> {
    tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .map_err(|_| ClientError::AlreadyInstalled)
}

/// Installs a subscriber appending plain-text lines to `path`.
pub fn init_file_tracing(path: impl AsRef<Path>, level: Level) -> Result<(), ClientError> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|_| ClientError::AlreadyInstalled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_reported() {
        let _ = init_tracing(Level::WARN);
        assert!(matches!(init_tracing(Level::WARN), Err(ClientError::AlreadyInstalled)));
    }

    #[test]
    fn unopenable_log_file_is_an_io_error() {
        let err = init_file_tracing("/nonexistent-dir/cbpp.log", Level::INFO).unwrap_err();
        assert!(matches!(err, ClientError::Io(_)));
    }
}
