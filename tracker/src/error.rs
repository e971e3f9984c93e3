//! Error types for the Heartbeat Tracker.
//!
//! Producers never see errors: recording activity is fire-and-forget. The
//! types here surface only while starting the tracker or running the host
//! binary.

use thiserror::Error;

use crate::config::ConfigError;
use crate::transport::TransportError;

/// Errors that can occur while starting or running the tracker.
#[derive(Error, Debug)]
pub enum TrackerError {
    /// Configuration-related error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The transport could not be constructed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// I/O error (e.g., reading activity from stdin).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The tracker was started outside a Tokio runtime.
    #[error("no Tokio runtime is available to run the flusher")]
    NoRuntime,
}

/// A specialized `Result` type for tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_invalid_value_display() {
        let err = ConfigError::InvalidValue {
            key: "HEARTBEAT_QUEUE_CAPACITY".to_string(),
            message: "queue capacity must be greater than 0".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid value for HEARTBEAT_QUEUE_CAPACITY: queue capacity must be greater than 0"
        );
    }

    #[test]
    fn tracker_error_config_display() {
        let err: TrackerError = ConfigError::InvalidValue {
            key: "HEARTBEAT_TRANSPORT".to_string(),
            message: "expected 'http' or 'cli'".to_string(),
        }
        .into();
        assert!(matches!(err, TrackerError::Config(_)));
        assert_eq!(
            err.to_string(),
            "configuration error: invalid value for HEARTBEAT_TRANSPORT: expected 'http' or 'cli'"
        );
    }

    #[test]
    fn tracker_error_transport_conversion() {
        let err: TrackerError = TransportError::EmptyBatch.into();
        assert!(matches!(err, TrackerError::Transport(_)));
        assert_eq!(
            err.to_string(),
            "transport error: cannot dispatch an empty batch"
        );
    }

    #[test]
    fn tracker_error_io_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdin closed");
        let err: TrackerError = io_err.into();
        assert!(matches!(err, TrackerError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn tracker_error_no_runtime_display() {
        assert_eq!(
            TrackerError::NoRuntime.to_string(),
            "no Tokio runtime is available to run the flusher"
        );
    }

    #[test]
    fn errors_are_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TrackerError>();
        assert_send_sync::<ConfigError>();
        assert_send_sync::<TransportError>();
    }
}
