//! Error types shared across the pipeline.
//!
//! - [`EventError`]: raised when a payload cannot become an [`Event`](crate::Event)
//! - [`RepositoryError`]: raised by [`Storage`](crate::Storage) implementations
//! - [`NotificationError`]: raised by [`Notifier`](crate::Notifier) implementations

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Errors raised while constructing events.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    /// The payload is not valid JSON or lacks required top-level fields.
    #[error("invalid payload: {reason}")]
    InvalidPayload {
        /// Why the payload was rejected.
        reason: String,
    },

    /// An event field violates the event invariants.
    #[error("invalid event: {reason}")]
    InvalidEvent {
        /// Why the event was rejected.
        reason: String,
    },
}

impl EventError {
    /// Shorthand for [`EventError::InvalidPayload`].
    pub fn invalid_payload(reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            reason: reason.into(),
        }
    }
}

/// Result type for event construction.
pub type EventResult<T> = std::result::Result<T, EventError>;

/// The kind of a [`RepositoryError`], for branching without matching on text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryErrorKind {
    /// The requested entity does not exist.
    NotFound,
    /// The backing store failed.
    Database,
    /// The entity failed validation before it was written.
    Validation,
    /// A read query failed.
    Query,
    /// The store does not support the operation.
    UnsupportedOperation,
}

impl fmt::Display for RepositoryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not_found",
            Self::Database => "database",
            Self::Validation => "validation",
            Self::Query => "query",
            Self::UnsupportedOperation => "unsupported_operation",
        };
        write!(f, "{s}")
    }
}

/// Errors raised by storage collaborators.
///
/// Every variant carries the operation or entity it relates to so callers
/// can log context without parsing messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    /// The entity was required but is missing.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity type (`event`, `metric`, `alert`).
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// The backing store failed.
    #[error("database error during {operation}: {reason}")]
    Database {
        /// The storage operation that failed.
        operation: String,
        /// The underlying error text.
        reason: String,
        /// Additional fields describing the failed call.
        context: BTreeMap<String, String>,
    },

    /// The entity was rejected before being written.
    #[error("validation failed for {field}: {reason}")]
    Validation {
        /// The offending field.
        field: String,
        /// Why it is invalid.
        reason: String,
    },

    /// A read query failed.
    #[error("query {operation} failed: {reason}")]
    Query {
        /// The query that failed.
        operation: String,
        /// The underlying error text.
        reason: String,
    },

    /// The store does not implement this operation.
    #[error("unsupported operation: {operation}")]
    UnsupportedOperation {
        /// The operation that was attempted.
        operation: String,
    },
}

impl RepositoryError {
    /// Creates a [`RepositoryError::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a [`RepositoryError::Database`] with no extra context.
    pub fn database(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Database {
            operation: operation.into(),
            reason: reason.into(),
            context: BTreeMap::new(),
        }
    }

    /// Creates a [`RepositoryError::Validation`].
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Attaches a context field. Only [`RepositoryError::Database`] keeps context.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let Self::Database { context, .. } = &mut self {
            context.insert(key.into(), value.into());
        }
        self
    }

    /// Returns the kind of this error.
    #[must_use]
    pub const fn kind(&self) -> RepositoryErrorKind {
        match self {
            Self::NotFound { .. } => RepositoryErrorKind::NotFound,
            Self::Database { .. } => RepositoryErrorKind::Database,
            Self::Validation { .. } => RepositoryErrorKind::Validation,
            Self::Query { .. } => RepositoryErrorKind::Query,
            Self::UnsupportedOperation { .. } => RepositoryErrorKind::UnsupportedOperation,
        }
    }
}

/// Result type for storage operations.
pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

/// Errors raised by notification collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotificationError {
    /// A channel refused or failed to deliver.
    #[error("delivery via {channel} failed: {reason}")]
    DeliveryFailed {
        /// The channel that failed.
        channel: String,
        /// Why delivery failed.
        reason: String,
    },

    /// The named channel is not configured.
    #[error("unknown notification channel: {channel}")]
    UnknownChannel {
        /// The channel that was requested.
        channel: String,
    },
}

/// Result type for notification operations.
pub type NotificationResult<T> = std::result::Result<T, NotificationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_invalid_payload() {
        let err = EventError::invalid_payload("expected a JSON object");
        assert_eq!(err.to_string(), "invalid payload: expected a JSON object");
    }

    #[test]
    fn error_display_not_found() {
        let err = RepositoryError::not_found("metric", "abc-123");
        assert_eq!(err.to_string(), "metric not found: abc-123");
        assert_eq!(err.kind(), RepositoryErrorKind::NotFound);
    }

    #[test]
    fn database_error_keeps_context() {
        let err = RepositoryError::database("save_metric", "connection reset")
            .with_context("metric", "github.push_count");

        match &err {
            RepositoryError::Database { context, .. } => {
                assert_eq!(context.get("metric"), Some(&"github.push_count".to_string()));
            }
            other => panic!("expected Database error, got {other:?}"),
        }
        assert_eq!(
            err.to_string(),
            "database error during save_metric: connection reset"
        );
    }

    #[test]
    fn context_is_ignored_for_other_kinds() {
        let err = RepositoryError::validation("value", "not finite").with_context("k", "v");
        assert_eq!(err, RepositoryError::validation("value", "not finite"));
    }

    #[test]
    fn kinds_are_distinct() {
        let kinds = [
            RepositoryError::not_found("event", "1").kind(),
            RepositoryError::database("op", "x").kind(),
            RepositoryError::validation("f", "x").kind(),
            RepositoryError::Query {
                operation: "metric_history".to_string(),
                reason: "timeout".to_string(),
            }
            .kind(),
            RepositoryError::UnsupportedOperation {
                operation: "delete".to_string(),
            }
            .kind(),
        ];
        let unique: std::collections::HashSet<_> = kinds.iter().collect();
        assert_eq!(unique.len(), kinds.len());
    }

    #[test]
    fn error_display_notification() {
        let err = NotificationError::DeliveryFailed {
            channel: "webhook".to_string(),
            reason: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "delivery via webhook failed: connection refused"
        );
    }
}
