//! In-memory [`Storage`] implementation.
//!
//! All state sits behind one lock so that an increment's dedup check and
//! its add happen atomically with respect to other workers sharing the
//! store.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use pulse_core::{
    Alert, AlertId, BucketKey, Event, EventId, Granularity, IncrementOutcome, Metric, MetricId,
    MetricIncrement, RepositoryError, RepositoryResult, SeriesKey, Storage,
};

/// One aggregate row plus the dedup keys already applied to it.
#[derive(Debug)]
struct BucketRow {
    metric_id: MetricId,
    applied: HashSet<String>,
}

#[derive(Debug, Default)]
struct State {
    events: HashMap<EventId, Event>,
    metrics: HashMap<MetricId, Metric>,
    buckets: HashMap<BucketKey, BucketRow>,
    series: HashMap<(SeriesKey, Granularity), BTreeMap<DateTime<Utc>, MetricId>>,
    alerts: HashMap<AlertId, Alert>,
}

impl State {
    fn index_metric(&mut self, metric: &Metric) {
        self.series
            .entry((metric.series_key(), metric.granularity))
            .or_default()
            .insert(metric.recorded_at, metric.id.clone());
    }

    fn resolve<'a>(&self, ids: impl Iterator<Item = &'a MetricId>, limit: usize) -> Vec<Metric> {
        ids.filter_map(|id| self.metrics.get(id).cloned())
            .take(limit)
            .collect()
    }
}

/// Thread-safe in-memory storage.
///
/// Cloning shares the underlying data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    state: Arc<RwLock<State>>,
}

impl InMemoryStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the aggregate row for a bucket, if any.
    #[must_use]
    pub fn find_bucket(&self, bucket: &BucketKey) -> Option<Metric> {
        let state = self.state.read();
        let row = state.buckets.get(bucket)?;
        state.metrics.get(&row.metric_id).cloned()
    }

    /// Returns every stored metric.
    #[must_use]
    pub fn metrics(&self) -> Vec<Metric> {
        self.state.read().metrics.values().cloned().collect()
    }

    /// Returns every stored alert, oldest first.
    #[must_use]
    pub fn alerts(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self.state.read().alerts.values().cloned().collect();
        alerts.sort_by_key(|a| a.timestamp);
        alerts
    }

    /// Returns the number of stored events.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.state.read().events.len()
    }

    /// Returns the number of stored metrics.
    #[must_use]
    pub fn metric_count(&self) -> usize {
        self.state.read().metrics.len()
    }
}

impl Storage for InMemoryStorage {
    fn save_event(&self, event: &Event) -> RepositoryResult<EventId> {
        let id = event.id().clone();
        self.state.write().events.insert(id.clone(), event.clone());
        Ok(id)
    }

    fn find_event(&self, id: &EventId) -> RepositoryResult<Option<Event>> {
        Ok(self.state.read().events.get(id).cloned())
    }

    /// Saving into a bucket that already has a row replaces that row's value
    /// and keeps its id and applied dedup keys.
    #[allow(clippy::significant_drop_tightening)] // Lock held across index updates
    fn save_metric(&self, mut metric: Metric) -> RepositoryResult<Metric> {
        metric.validate()?;

        let mut state = self.state.write();
        match state.buckets.entry(metric.bucket_key()) {
            Entry::Occupied(row) => metric.id = row.get().metric_id.clone(),
            Entry::Vacant(slot) => {
                if metric.id.is_empty() {
                    metric.id = MetricId::generate();
                }
                slot.insert(BucketRow {
                    metric_id: metric.id.clone(),
                    applied: HashSet::new(),
                });
            }
        }
        state.index_metric(&metric);
        state.metrics.insert(metric.id.clone(), metric.clone());
        Ok(metric)
    }

    fn find_metric(&self, id: &MetricId) -> RepositoryResult<Option<Metric>> {
        Ok(self.state.read().metrics.get(id).cloned())
    }

    #[allow(clippy::significant_drop_tightening)] // Dedup check and add must be atomic
    fn increment_metric(&self, increment: MetricIncrement) -> RepositoryResult<IncrementOutcome> {
        if !increment.delta.is_finite() {
            return Err(RepositoryError::validation(
                "delta",
                format!("increment must be finite, got {}", increment.delta),
            ));
        }

        let mut guard = self.state.write();
        let state = &mut *guard;

        let row = state
            .buckets
            .entry(increment.bucket.clone())
            .or_insert_with(|| BucketRow {
                metric_id: MetricId::generate(),
                applied: HashSet::new(),
            });

        let metric = state
            .metrics
            .entry(row.metric_id.clone())
            .or_insert_with(|| {
                let mut metric = Metric::new(&increment.bucket, increment.source.clone(), 0.0);
                metric.id = row.metric_id.clone();
                metric
            });

        if row.applied.contains(&increment.dedup_key) {
            return Ok(IncrementOutcome::Duplicate(metric.clone()));
        }

        let updated = metric.value + increment.delta;
        if !updated.is_finite() {
            return Err(RepositoryError::database(
                "increment_metric",
                "aggregate value overflowed",
            )
            .with_context("metric", metric.name.as_str()));
        }
        metric.value = updated;
        row.applied.insert(increment.dedup_key);
        let metric = metric.clone();
        state.index_metric(&metric);

        debug!(
            metric = %metric.name,
            granularity = %metric.granularity,
            value = metric.value,
            "incremented metric bucket"
        );

        Ok(IncrementOutcome::Applied(metric))
    }

    fn metric_history(
        &self,
        series: &SeriesKey,
        granularity: Granularity,
        limit: usize,
    ) -> RepositoryResult<Vec<Metric>> {
        let state = self.state.read();
        let Some(index) = state.series.get(&(series.clone(), granularity)) else {
            return Ok(Vec::new());
        };
        Ok(state.resolve(index.values().rev(), limit))
    }

    fn metric_history_before(
        &self,
        series: &SeriesKey,
        granularity: Granularity,
        before: DateTime<Utc>,
        limit: usize,
    ) -> RepositoryResult<Vec<Metric>> {
        let state = self.state.read();
        let Some(index) = state.series.get(&(series.clone(), granularity)) else {
            return Ok(Vec::new());
        };
        Ok(state.resolve(index.range(..before).rev().map(|(_, id)| id), limit))
    }

    fn save_alert(&self, mut alert: Alert) -> RepositoryResult<Alert> {
        if alert.id.as_str().is_empty() {
            alert.id = AlertId::generate();
        }
        if !alert.threshold.is_finite() {
            return Err(RepositoryError::validation(
                "threshold",
                "alert threshold must be finite",
            ));
        }
        self.state
            .write()
            .alerts
            .insert(alert.id.clone(), alert.clone());
        Ok(alert)
    }

    fn find_alert(&self, id: &AlertId) -> RepositoryResult<Option<Alert>> {
        Ok(self.state.read().alerts.get(id).cloned())
    }
}
