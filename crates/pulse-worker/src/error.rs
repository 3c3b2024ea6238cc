//! Error types for the worker.

use thiserror::Error;

use pulse_alerts::AlertError;
use pulse_core::{EventError, RepositoryError, RepositoryErrorKind};
use pulse_queue::QueueError;

/// Errors raised while configuring the worker or processing a job.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A raw payload could not be turned into an event.
    #[error("event error: {0}")]
    Event(#[from] EventError),

    /// Persistence failed.
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// A queue operation failed.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Detection or notification setup failed.
    #[error("alert error: {0}")]
    Alert(#[from] AlertError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    /// Returns false for failures that no retry can fix: malformed
    /// payloads and rejected writes.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Event(_) | Self::Config(_) => false,
            Self::Repository(err) => !matches!(err.kind(), RepositoryErrorKind::Validation),
            Self::Queue(_) | Self::Alert(_) | Self::Io(_) => true,
        }
    }
}

/// Result type for worker operations.
pub type Result<T> = std::result::Result<T, WorkerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::EventId;
    use pulse_queue::QueueName;

    #[test]
    fn config_error_display() {
        let err = WorkerError::Config("batch_size must be positive".to_string());
        assert_eq!(
            err.to_string(),
            "configuration error: batch_size must be positive"
        );
    }

    #[test]
    fn wraps_queue_backpressure() {
        let err: WorkerError = QueueError::Backpressure {
            queue: QueueName::RawEvents,
            depth: 10,
            max: 10,
        }
        .into();
        assert!(matches!(err, WorkerError::Queue(ref e) if e.is_backpressure()));
    }

    #[test]
    fn wraps_missing_event() {
        let err: WorkerError =
            RepositoryError::not_found("event", EventId::new("e-1").as_str()).into();
        assert!(err.to_string().starts_with("repository error: "));
    }

    #[test]
    fn wraps_invalid_payload() {
        let err: WorkerError = EventError::invalid_payload("not json").into();
        assert_eq!(err.to_string(), "event error: invalid payload: not json");
        assert!(!err.is_retryable());
    }

    #[test]
    fn retryable_kinds() {
        let missing: WorkerError = RepositoryError::not_found("metric", "m-1").into();
        assert!(missing.is_retryable());

        let database: WorkerError = RepositoryError::database("increment_metric", "locked").into();
        assert!(database.is_retryable());

        let invalid: WorkerError = RepositoryError::validation("value", "not finite").into();
        assert!(!invalid.is_retryable());
    }
}
