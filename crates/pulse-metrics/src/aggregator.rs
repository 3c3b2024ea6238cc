//! Bucketed aggregation of metric observations.
//!
//! Observations are folded into `(name, dimensions, bucket)` rows with
//! additive increments. Every increment carries a dedup key derived from the
//! observation's event, name and dimensions, so replaying the same batch is
//! a no-op and the order of application never changes the totals.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use pulse_core::{
    BucketKey, EventId, Granularity, IncrementOutcome, Metric, MetricCache, MetricIncrement,
    MetricObservation, RepositoryResult, Source, Storage,
};

/// One observation plus the event context needed to aggregate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    /// The event the observation came from.
    pub event_id: EventId,
    /// The event's source.
    pub source: Source,
    /// When the event happened; selects the bucket.
    pub timestamp: DateTime<Utc>,
    /// The observation itself.
    pub observation: MetricObservation,
}

impl ObservationRecord {
    /// Creates a record.
    #[must_use]
    pub const fn new(
        event_id: EventId,
        source: Source,
        timestamp: DateTime<Utc>,
        observation: MetricObservation,
    ) -> Self {
        Self {
            event_id,
            source,
            timestamp,
            observation,
        }
    }

    /// Returns the stable dedup key for this record.
    #[must_use]
    pub fn dedup_key(&self) -> String {
        dedup_key(&self.event_id, &self.observation)
    }

    /// Returns the bucket this record falls into at `granularity`.
    #[must_use]
    pub fn bucket(&self, granularity: Granularity) -> BucketKey {
        BucketKey::for_timestamp(self.observation.series_key(), granularity, self.timestamp)
    }
}

/// Derives the dedup key for an observation of `event_id`.
///
/// The key is a BLAKE3 digest over the event id, metric name and the sorted
/// dimension pairs. Field separators keep `("ab", "c")` and `("a", "bc")`
/// apart.
#[must_use]
pub fn dedup_key(event_id: &EventId, observation: &MetricObservation) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(event_id.as_str().as_bytes());
    hasher.update(&[0x1f]);
    hasher.update(observation.name.as_str().as_bytes());
    for (key, value) in observation.dimensions.iter() {
        hasher.update(&[0x1e]);
        hasher.update(key.as_bytes());
        hasher.update(&[0x1f]);
        hasher.update(value.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// Aggregation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Granularities every observation is rolled into.
    pub granularities: Vec<Granularity>,
    /// Granularity whose updated rows are written to the cache.
    pub cached_granularity: Granularity,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            granularities: vec![
                Granularity::FiveMinutes,
                Granularity::Hourly,
                Granularity::Daily,
            ],
            cached_granularity: Granularity::FiveMinutes,
        }
    }
}

/// The result of one aggregation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationReport {
    /// Increments that changed a row.
    pub applied: usize,
    /// Increments already recorded for their bucket.
    pub duplicates: usize,
    /// Observations dropped because their value was not finite.
    pub skipped: usize,
    /// Rows touched by applied increments, one per bucket, in first-touch
    /// order.
    pub updated: Vec<Metric>,
    /// Rows whose increment from this batch an earlier pass already
    /// recorded, one per bucket.
    pub already_applied: Vec<Metric>,
}

impl AggregationReport {
    /// Folds another report into this one.
    pub fn merge(&mut self, other: Self) {
        self.applied += other.applied;
        self.duplicates += other.duplicates;
        self.skipped += other.skipped;
        for metric in other.updated {
            upsert_updated(&mut self.updated, metric);
        }
        for metric in other.already_applied {
            upsert_updated(&mut self.already_applied, metric);
        }
    }

    /// Returns the updated rows at one granularity.
    pub fn updated_at(&self, granularity: Granularity) -> impl Iterator<Item = &Metric> {
        self.updated
            .iter()
            .filter(move |m| m.granularity == granularity)
    }

    /// Returns every row this batch contributes to at one granularity,
    /// whether applied now or by an earlier pass.
    pub fn touched_at(&self, granularity: Granularity) -> impl Iterator<Item = &Metric> {
        let earlier = self
            .already_applied
            .iter()
            .filter(|m| !self.updated.iter().any(|u| u.id == m.id));
        self.updated
            .iter()
            .chain(earlier)
            .filter(move |m| m.granularity == granularity)
    }
}

fn upsert_updated(updated: &mut Vec<Metric>, metric: Metric) {
    match updated.iter_mut().find(|m| m.id == metric.id) {
        Some(existing) => *existing = metric,
        None => updated.push(metric),
    }
}

/// Applies observations to storage as idempotent bucket increments.
pub struct Aggregator {
    storage: Arc<dyn Storage>,
    cache: Option<Arc<dyn MetricCache>>,
    config: AggregationConfig,
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("cache", &self.cache.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Aggregator {
    /// Creates an aggregator with the default configuration.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            cache: None,
            config: AggregationConfig::default(),
        }
    }

    /// Writes updated rows to `cache`.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn MetricCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: AggregationConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Aggregates `records` into buckets of one granularity.
    ///
    /// # Errors
    ///
    /// Returns the first storage error. Increments applied before the error
    /// stay applied; replaying the batch skips them by dedup key.
    pub fn aggregate(
        &self,
        granularity: Granularity,
        records: &[ObservationRecord],
    ) -> RepositoryResult<AggregationReport> {
        let mut report = AggregationReport::default();
        let mut seen = HashSet::new();

        for record in records {
            let value = record.observation.value;
            if !value.is_finite() {
                warn!(
                    event_id = %record.event_id,
                    metric = %record.observation.name,
                    value,
                    "skipping non-finite observation"
                );
                report.skipped += 1;
                continue;
            }

            let bucket = record.bucket(granularity);
            let dedup_key = record.dedup_key();
            // A repeated observation within one batch never reaches storage.
            if !seen.insert((bucket.clone(), dedup_key.clone())) {
                report.duplicates += 1;
                continue;
            }

            let outcome = self.storage.increment_metric(MetricIncrement {
                bucket,
                source: record.source.clone(),
                delta: value,
                dedup_key,
            })?;

            match outcome {
                IncrementOutcome::Applied(metric) => {
                    report.applied += 1;
                    upsert_updated(&mut report.updated, metric);
                }
                IncrementOutcome::Duplicate(metric) => {
                    debug!(
                        event_id = %record.event_id,
                        metric = %metric.name,
                        "observation already aggregated"
                    );
                    report.duplicates += 1;
                    upsert_updated(&mut report.already_applied, metric);
                }
            }
        }

        if granularity == self.config.cached_granularity {
            if let Some(cache) = &self.cache {
                for metric in &report.updated {
                    cache.cache_metric(metric);
                }
            }
        }

        debug!(
            granularity = %granularity,
            applied = report.applied,
            duplicates = report.duplicates,
            skipped = report.skipped,
            "aggregation pass complete"
        );

        Ok(report)
    }

    /// Aggregates `records` at every configured granularity.
    ///
    /// # Errors
    ///
    /// Returns the first storage error.
    pub fn aggregate_all(&self, records: &[ObservationRecord]) -> RepositoryResult<AggregationReport> {
        let mut report = AggregationReport::default();
        for granularity in &self.config.granularities {
            report.merge(self.aggregate(*granularity, records)?);
        }
        Ok(report)
    }
}

/// Pending observations waiting for the next aggregation run.
///
/// `flush` takes a fixed snapshot of the buffer; records pushed while a
/// flush is running land in the next run.
#[derive(Debug, Default)]
pub struct AggregationBuffer {
    pending: Mutex<Vec<ObservationRecord>>,
}

impl AggregationBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues records for the next flush.
    pub fn push(&self, records: impl IntoIterator<Item = ObservationRecord>) {
        self.pending.lock().extend(records);
    }

    /// Returns the number of pending records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Aggregates the current snapshot at every configured granularity.
    ///
    /// # Errors
    ///
    /// On a storage error the snapshot is put back so the next flush retries
    /// it; already-applied increments are skipped by dedup key.
    pub fn flush(&self, aggregator: &Aggregator) -> RepositoryResult<AggregationReport> {
        let snapshot = std::mem::take(&mut *self.pending.lock());
        if snapshot.is_empty() {
            return Ok(AggregationReport::default());
        }

        match aggregator.aggregate_all(&snapshot) {
            Ok(report) => {
                info!(
                    records = snapshot.len(),
                    applied = report.applied,
                    duplicates = report.duplicates,
                    "flushed aggregation buffer"
                );
                Ok(report)
            }
            Err(err) => {
                warn!(records = snapshot.len(), error = %err, "aggregation flush failed, requeueing");
                let mut pending = self.pending.lock();
                let newer = std::mem::replace(&mut *pending, snapshot);
                pending.extend(newer);
                Err(err)
            }
        }
    }
}
