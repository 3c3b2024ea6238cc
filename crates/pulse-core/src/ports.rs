//! Collaborator ports.
//!
//! The pipeline reaches persistence, caching and notification only through
//! these traits. Implementations are injected through constructors.

use chrono::{DateTime, Utc};

use crate::alert::{Alert, AlertId};
use crate::error::{NotificationResult, RepositoryError, RepositoryResult};
use crate::event::{Event, EventId};
use crate::metric::{
    Dimensions, Granularity, IncrementOutcome, Metric, MetricId, MetricIncrement, MetricName,
    SeriesKey,
};

/// Persistence for events, metrics and alerts.
///
/// `save_*` assigns an identifier when the entity has none. `find_*` returns
/// `Ok(None)` for a missing id; use the `require_*` helpers when absence is
/// an error.
pub trait Storage: Send + Sync {
    /// Persists an event and returns its id.
    fn save_event(&self, event: &Event) -> RepositoryResult<EventId>;

    /// Looks up an event.
    fn find_event(&self, id: &EventId) -> RepositoryResult<Option<Event>>;

    /// Persists a metric, assigning an id if it has none.
    ///
    /// A metric for a bucket that already has a row replaces that row and
    /// takes its id.
    fn save_metric(&self, metric: Metric) -> RepositoryResult<Metric>;

    /// Looks up a metric.
    fn find_metric(&self, id: &MetricId) -> RepositoryResult<Option<Metric>>;

    /// Atomically adds `increment.delta` to the row for `increment.bucket`,
    /// creating it if needed.
    ///
    /// If `increment.dedup_key` was already applied to that bucket the row is
    /// left untouched and [`IncrementOutcome::Duplicate`] is returned.
    fn increment_metric(&self, increment: MetricIncrement) -> RepositoryResult<IncrementOutcome>;

    /// Returns up to `limit` most recent rows of a series at one granularity,
    /// newest first.
    fn metric_history(
        &self,
        series: &SeriesKey,
        granularity: Granularity,
        limit: usize,
    ) -> RepositoryResult<Vec<Metric>>;

    /// Like [`Storage::metric_history`] but only rows recorded strictly
    /// before `before`.
    fn metric_history_before(
        &self,
        series: &SeriesKey,
        granularity: Granularity,
        before: DateTime<Utc>,
        limit: usize,
    ) -> RepositoryResult<Vec<Metric>>;

    /// Persists an alert.
    fn save_alert(&self, alert: Alert) -> RepositoryResult<Alert>;

    /// Looks up an alert.
    fn find_alert(&self, id: &AlertId) -> RepositoryResult<Option<Alert>>;

    /// Like [`Storage::find_event`] but missing is an error.
    fn require_event(&self, id: &EventId) -> RepositoryResult<Event> {
        self.find_event(id)?
            .ok_or_else(|| RepositoryError::not_found("event", id.as_str()))
    }

    /// Like [`Storage::find_metric`] but missing is an error.
    fn require_metric(&self, id: &MetricId) -> RepositoryResult<Metric> {
        self.find_metric(id)?
            .ok_or_else(|| RepositoryError::not_found("metric", id.as_str()))
    }

    /// Like [`Storage::find_alert`] but missing is an error.
    fn require_alert(&self, id: &AlertId) -> RepositoryResult<Alert> {
        self.find_alert(id)?
            .ok_or_else(|| RepositoryError::not_found("alert", id.as_str()))
    }
}

/// Advisory cache of current metric values.
///
/// A miss means "recompute", never "zero".
pub trait MetricCache: Send + Sync {
    /// Stores the metric's value under its name and dimensions.
    fn cache_metric(&self, metric: &Metric);

    /// Returns the cached value, if any.
    fn get_cached_metric(&self, name: &MetricName, dimensions: &Dimensions) -> Option<f64>;

    /// Drops every cached value.
    fn clear_metric_cache(&self);
}

/// Outbound notifications.
///
/// A failure here never undoes a persisted alert.
pub trait Notifier: Send + Sync {
    /// Delivers an alert.
    fn send_alert(&self, alert: &Alert) -> NotificationResult<()>;

    /// Sends free text to a named channel.
    fn send_message(&self, channel: &str, text: &str) -> NotificationResult<()>;
}
