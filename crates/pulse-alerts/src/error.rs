//! Error types for the pulse-alerts crate.

use pulse_core::{NotificationError, RepositoryError};
use thiserror::Error;

/// Errors that can occur while detecting anomalies or dispatching alerts.
#[derive(Debug, Error)]
pub enum AlertError {
    /// A threshold policy is malformed.
    #[error("invalid policy: {reason}")]
    InvalidPolicy {
        /// Why the policy was rejected.
        reason: String,
    },

    /// A policy name pattern is not a valid regular expression.
    #[error("invalid pattern {pattern:?}: {reason}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// The regex compiler's message.
        reason: String,
    },

    /// Notification delivery failed.
    #[error("notification failed: {0}")]
    Notification(#[from] NotificationError),

    /// Persistence failed.
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for AlertError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Result type for alert operations.
pub type Result<T> = std::result::Result<T, AlertError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_invalid_policy() {
        let err = AlertError::InvalidPolicy {
            reason: "threshold must be finite".to_string(),
        };
        assert_eq!(err.to_string(), "invalid policy: threshold must be finite");
    }

    #[test]
    fn error_display_invalid_pattern() {
        let err = AlertError::InvalidPattern {
            pattern: "cpu(".to_string(),
            reason: "unclosed group".to_string(),
        };
        assert_eq!(err.to_string(), "invalid pattern \"cpu(\": unclosed group");
    }

    #[test]
    fn error_from_repository() {
        let err: AlertError = RepositoryError::not_found("alert", "a-1").into();
        assert!(matches!(err, AlertError::Repository(_)));
    }

    #[test]
    fn error_from_notification() {
        let err: AlertError = NotificationError::UnknownChannel {
            channel: "pager".to_string(),
        }
        .into();
        assert!(err.to_string().starts_with("notification failed:"));
    }

    #[test]
    fn error_from_serde_json() {
        let json_err = serde_json::from_str::<String>("invalid json").unwrap_err();
        let err: AlertError = json_err.into();
        assert!(matches!(err, AlertError::SerializationError(_)));
    }
}
