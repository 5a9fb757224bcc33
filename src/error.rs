//! Error types for procpool.

use thiserror::Error;

/// Main error type for procpool.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    #[error("System sampler error: {0}")]
    Sampler(String),

    #[error("Status server error: {0}")]
    Server(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Status endpoint returned HTTP {status} at {url}")]
    ApiError { status: u16, url: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for procpool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_error_message() {
        let err = PoolError::Config("min_workers (4) exceeds max_workers (2)".to_string());
        let msg = err.to_string();
        assert!(msg.starts_with("Invalid configuration"));
        assert!(msg.contains("min_workers (4)"));
    }

    #[test]
    fn test_spawn_error_message() {
        let err = PoolError::Spawn("No such file or directory".to_string());
        assert_eq!(
            err.to_string(),
            "Failed to spawn worker: No such file or directory"
        );
    }

    #[test]
    fn test_api_error_message() {
        let err = PoolError::ApiError {
            status: 503,
            url: "http://127.0.0.1:7070/status".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("503"));
        assert!(msg.contains("/status"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed");
        let err: PoolError = io_err.into();
        assert!(err.to_string().contains("pipe closed"));
    }
}
