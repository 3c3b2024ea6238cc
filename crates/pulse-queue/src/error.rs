//! Error types for the pulse-queue crate.

use thiserror::Error;

use crate::queue::QueueName;

/// Errors that can occur while admitting or moving jobs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// A monitored queue is at or above its configured maximum depth.
    ///
    /// This is a "retry later" signal for the ingestion boundary, not a
    /// crash condition.
    #[error("queue {queue} is saturated: depth {depth} >= max {max}")]
    Backpressure {
        /// The saturated queue.
        queue: QueueName,
        /// Its depth at check time.
        depth: usize,
        /// Its configured maximum.
        max: usize,
    },

    /// A job moved between states that are not connected.
    #[error("invalid job state transition from {from} to {to}")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The requested state.
        to: String,
    },

    /// The job is not tracked by the backend.
    #[error("job not found: {id}")]
    JobNotFound {
        /// The missing job id.
        id: String,
    },

    /// The queueing collaborator failed.
    #[error("queue backend error: {reason}")]
    Backend {
        /// Why the backend failed.
        reason: String,
    },
}

impl QueueError {
    /// Returns true for backpressure rejections.
    #[must_use]
    pub const fn is_backpressure(&self) -> bool {
        matches!(self, Self::Backpressure { .. })
    }
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
