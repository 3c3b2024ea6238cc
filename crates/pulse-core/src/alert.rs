//! Alert entity produced by anomaly detection.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RepositoryError, RepositoryResult};
use crate::metric::Metric;

/// The severity level of an alert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Informational alert, no action required.
    Info,
    /// Warning alert, should be investigated.
    #[default]
    Warning,
    /// Critical alert, requires immediate attention.
    Critical,
}

impl AlertSeverity {
    /// Returns the severity as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of an alert.
///
/// Alerts are created `Active`; operators move them forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    /// Newly raised.
    #[default]
    Active,
    /// Seen by an operator.
    Acknowledged,
    /// Closed.
    Resolved,
}

impl AlertStatus {
    /// Returns the status as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Alert identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(String);

impl AlertId {
    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An alert raised because a metric crossed its threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Unique identifier.
    pub id: AlertId,
    /// Human-readable alert name.
    pub name: String,
    /// Severity.
    pub severity: AlertSeverity,
    /// Snapshot of the triggering metric.
    pub metric: Metric,
    /// The threshold that was exceeded.
    pub threshold: f64,
    /// When the alert was raised.
    pub timestamp: DateTime<Utc>,
    /// Lifecycle status.
    pub status: AlertStatus,
}

impl Alert {
    /// Creates an active alert for `metric`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        severity: AlertSeverity,
        metric: Metric,
        threshold: f64,
    ) -> Self {
        Self {
            id: AlertId::generate(),
            name: name.into(),
            severity,
            metric,
            threshold,
            timestamp: Utc::now(),
            status: AlertStatus::Active,
        }
    }

    /// Moves an active alert to acknowledged.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Validation` unless the alert is active.
    pub fn acknowledge(&mut self) -> RepositoryResult<()> {
        if self.status != AlertStatus::Active {
            return Err(RepositoryError::validation(
                "status",
                format!("cannot acknowledge an alert that is {}", self.status),
            ));
        }
        self.status = AlertStatus::Acknowledged;
        Ok(())
    }

    /// Resolves an active or acknowledged alert.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Validation` if the alert is already resolved.
    pub fn resolve(&mut self) -> RepositoryResult<()> {
        if self.status == AlertStatus::Resolved {
            return Err(RepositoryError::validation(
                "status",
                "alert is already resolved",
            ));
        }
        self.status = AlertStatus::Resolved;
        Ok(())
    }

    /// Returns true if the alert has not been resolved.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status != AlertStatus::Resolved
    }
}
