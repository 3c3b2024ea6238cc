//! Stage handlers: one function per queue.
//!
//! Each handler does the work for one job and schedules the next stage:
//!
//! | Queue                | Work                                   | Schedules              |
//! |----------------------|----------------------------------------|------------------------|
//! | `raw_events`         | parse and store the event              | `event_processing`     |
//! | `event_processing`   | nothing                                | `metric_calculation`   |
//! | `metric_calculation` | classify and aggregate                 | `anomaly_detection` per updated metric |
//! | `anomaly_detection`  | evaluate, persist alert, notify        | nothing                |

use std::sync::Arc;

use tracing::{debug, info};

use pulse_alerts::{AnomalyDetector, Dispatcher, LogChannel, PolicySet, WebhookChannel};
use pulse_classify::{Classification, EventClassifier, parse_raw_event};
use pulse_core::{
    Alert, EventId, Granularity, Metric, MetricCache, MetricId, Notifier, RawEvent, Storage,
};
use pulse_metrics::{AggregationReport, Aggregator, ObservationRecord};
use pulse_queue::{AdmissionController, JobId, JobPayload};

use crate::config::{NotificationConfig, PulseConfig};
use crate::error::Result;

/// What a stage handler did.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// A raw event was parsed and stored.
    EventStored {
        /// The stored event.
        event_id: EventId,
        /// The `event_processing` job.
        next: JobId,
    },
    /// A stored event was scheduled for metric calculation.
    Scheduled {
        /// The `metric_calculation` job.
        next: JobId,
    },
    /// An event was classified and aggregated.
    Aggregated {
        /// Increments that changed a row.
        applied: usize,
        /// Increments that were already recorded.
        duplicates: usize,
        /// One `anomaly_detection` job per updated metric.
        next: Vec<JobId>,
    },
    /// A metric was checked.
    Detected {
        /// The alert raised, if any.
        alert: Option<Alert>,
    },
}

/// Which aggregated rows get an `anomaly_detection` job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetectionScope {
    /// Rows changed by this attempt.
    Updated,
    /// Rows changed by this attempt or an earlier one.
    Touched,
}

/// The pipeline's components, wired by constructor.
pub struct Pipeline {
    admission: Arc<AdmissionController>,
    storage: Arc<dyn Storage>,
    classifier: EventClassifier,
    aggregator: Aggregator,
    detector: AnomalyDetector,
    detection_granularity: Granularity,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("admission", &self.admission)
            .field("aggregator", &self.aggregator)
            .field("detection_granularity", &self.detection_granularity)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Creates a pipeline with default classification, aggregation and
    /// detection settings and no cache.
    #[must_use]
    pub fn new(
        admission: Arc<AdmissionController>,
        storage: Arc<dyn Storage>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            admission,
            aggregator: Aggregator::new(storage.clone()),
            detector: AnomalyDetector::new(storage.clone(), notifier),
            storage,
            classifier: EventClassifier::new(),
            detection_granularity: Granularity::FiveMinutes,
        }
    }

    /// Builds every component from `config`.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::Alert` if the detection policies do not
    /// compile.
    pub fn from_config(
        config: &PulseConfig,
        admission: Arc<AdmissionController>,
        storage: Arc<dyn Storage>,
        cache: Arc<dyn MetricCache>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let policies = PolicySet::compile(&config.detection)?;
        let aggregator = Aggregator::new(storage.clone())
            .with_cache(cache)
            .with_config(config.aggregation.clone());
        let detector = AnomalyDetector::new(storage.clone(), notifier).with_policies(policies);

        Ok(Self {
            admission,
            storage,
            classifier: EventClassifier::new(),
            aggregator,
            detector,
            detection_granularity: config.aggregation.cached_granularity,
        })
    }

    /// Replaces the classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: EventClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Replaces the aggregator.
    #[must_use]
    pub fn with_aggregator(mut self, aggregator: Aggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    /// Replaces the detector.
    #[must_use]
    pub fn with_detector(mut self, detector: AnomalyDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Sets which granularity's updated rows are checked for anomalies.
    #[must_use]
    pub const fn with_detection_granularity(mut self, granularity: Granularity) -> Self {
        self.detection_granularity = granularity;
        self
    }

    /// Returns the admission controller.
    #[must_use]
    pub const fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    /// Admits a raw event at the ingestion boundary.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::Queue` wrapping `QueueError::Backpressure` when
    /// a queue is saturated; the caller should retry later.
    pub fn ingest(&self, raw: RawEvent) -> Result<JobId> {
        Ok(self.admission.enqueue_raw_event(raw)?)
    }

    /// Runs the stage a job belongs to.
    ///
    /// # Errors
    ///
    /// Returns the stage's error; the caller decides whether to retry.
    pub fn handle(&self, payload: &JobPayload) -> Result<StageOutcome> {
        self.handle_attempt(payload, 0)
    }

    /// Runs the stage for a job that already failed `attempts` times.
    ///
    /// A retried calculation re-checks every row the event contributes to,
    /// since the failed attempt may have applied increments without
    /// scheduling their detections.
    ///
    /// # Errors
    ///
    /// Returns the stage's error; the caller decides whether to retry.
    pub fn handle_attempt(&self, payload: &JobPayload, attempts: u32) -> Result<StageOutcome> {
        match payload {
            JobPayload::RawEvent { raw } => self.store_raw_event(raw),
            JobPayload::ProcessEvent { event_id } => self.schedule_calculation(event_id),
            JobPayload::CalculateMetrics { event_id } if attempts > 0 => {
                self.recalculate_metrics(event_id)
            }
            JobPayload::CalculateMetrics { event_id } => self.calculate_metrics(event_id),
            JobPayload::DetectAnomaly { metric_id } => self.detect_anomaly(metric_id),
        }
    }

    /// `raw_events`: parse, store, schedule processing.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::Event` for a malformed payload, or storage and
    /// queue errors.
    pub fn store_raw_event(&self, raw: &RawEvent) -> Result<StageOutcome> {
        let event = parse_raw_event(raw)?;
        let event_id = self.storage.save_event(&event)?;
        let next = self.admission.enqueue_event_processing(event_id.clone())?;
        debug!(event_id = %event_id, name = %event.name(), "event stored");
        Ok(StageOutcome::EventStored { event_id, next })
    }

    /// `event_processing`: schedule metric calculation.
    ///
    /// # Errors
    ///
    /// Returns queue errors.
    pub fn schedule_calculation(&self, event_id: &EventId) -> Result<StageOutcome> {
        let next = self.admission.enqueue_metric_calculation(event_id.clone())?;
        Ok(StageOutcome::Scheduled { next })
    }

    /// `metric_calculation`: classify the stored event, aggregate every
    /// observation and schedule a detection per updated metric.
    ///
    /// Replaying an event applies nothing and schedules nothing; retries go
    /// through [`Pipeline::recalculate_metrics`].
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the event is gone, or storage
    /// and queue errors.
    pub fn calculate_metrics(&self, event_id: &EventId) -> Result<StageOutcome> {
        self.aggregate_event(event_id, DetectionScope::Updated)
    }

    /// Retry of `metric_calculation`: like [`Pipeline::calculate_metrics`]
    /// but schedules a detection for every row the event contributes to,
    /// including rows an earlier attempt already incremented.
    ///
    /// # Errors
    ///
    /// Same as [`Pipeline::calculate_metrics`].
    pub fn recalculate_metrics(&self, event_id: &EventId) -> Result<StageOutcome> {
        self.aggregate_event(event_id, DetectionScope::Touched)
    }

    fn aggregate_event(&self, event_id: &EventId, scope: DetectionScope) -> Result<StageOutcome> {
        let event = self.storage.require_event(event_id)?;
        let Classification {
            event_id,
            source,
            timestamp,
            metrics,
        } = self.classifier.classify(&event);

        let records: Vec<ObservationRecord> = metrics
            .into_iter()
            .map(|observation| {
                ObservationRecord::new(event_id.clone(), source.clone(), timestamp, observation)
            })
            .collect();

        let report = self.aggregator.aggregate_all(&records)?;
        let next = self.schedule_detection(&report, scope)?;

        info!(
            event_id = %event_id,
            observations = records.len(),
            applied = report.applied,
            duplicates = report.duplicates,
            detections = next.len(),
            "event aggregated"
        );

        Ok(StageOutcome::Aggregated {
            applied: report.applied,
            duplicates: report.duplicates,
            next,
        })
    }

    fn schedule_detection(
        &self,
        report: &AggregationReport,
        scope: DetectionScope,
    ) -> Result<Vec<JobId>> {
        let rows: Vec<&Metric> = match scope {
            DetectionScope::Updated => report.updated_at(self.detection_granularity).collect(),
            DetectionScope::Touched => report.touched_at(self.detection_granularity).collect(),
        };
        rows.into_iter()
            .map(|metric| {
                self.admission
                    .enqueue_anomaly_detection(metric.id.clone())
                    .map_err(Into::into)
            })
            .collect()
    }

    /// `anomaly_detection`: evaluate the stored metric.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the metric is gone, or
    /// storage errors. Notification failures are not errors.
    pub fn detect_anomaly(&self, metric_id: &MetricId) -> Result<StageOutcome> {
        let metric = self.storage.require_metric(metric_id)?;
        let alert = self.detector.detect(&metric)?;
        Ok(StageOutcome::Detected { alert })
    }
}

/// Builds the notification dispatcher described by `config`.
#[must_use]
pub fn build_dispatcher(config: &NotificationConfig) -> Dispatcher {
    let dispatcher = Dispatcher::new();
    if config.log {
        dispatcher.add_channel(Box::new(LogChannel::default()));
    }
    for webhook in &config.webhooks {
        dispatcher.add_channel(Box::new(WebhookChannel::new(webhook.clone())));
    }
    dispatcher
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkerError;
    use pulse_alerts::MemoryChannel;
    use chrono::Utc;
    use chrono::DateTime;
    use pulse_core::{
        AlertId, AlertSeverity, BucketKey, Dimensions, Event, IncrementOutcome, MetricIncrement,
        MetricName, RepositoryError, RepositoryErrorKind, RepositoryResult, SeriesKey, Source,
    };
    use pulse_metrics::{InMemoryMetricCache, InMemoryStorage};
    use pulse_queue::{InMemoryQueue, QueueBackend, QueueName};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Harness {
        queue: Arc<InMemoryQueue>,
        storage: Arc<InMemoryStorage>,
        channel: Arc<MemoryChannel>,
        pipeline: Pipeline,
    }

    fn harness() -> Harness {
        let queue = Arc::new(InMemoryQueue::new());
        let storage = Arc::new(InMemoryStorage::new());
        let channel = Arc::new(MemoryChannel::new("memory"));
        let dispatcher = Arc::new(Dispatcher::new().with_channel(channel.clone()));
        let admission = Arc::new(AdmissionController::new(queue.clone()));
        let pipeline = Pipeline::from_config(
            &PulseConfig::default(),
            admission,
            storage.clone(),
            Arc::new(InMemoryMetricCache::new()),
            dispatcher,
        )
        .unwrap();
        Harness {
            queue,
            storage,
            channel,
            pipeline,
        }
    }

    const PUSH: &str = r#"{
        "ref": "refs/heads/main",
        "repository": {"full_name": "acme/api"},
        "head_commit": {"timestamp": "2024-03-01T10:02:00Z"},
        "commits": [{"added": ["app/models/x.rb"], "modified": ["README.md"]}]
    }"#;

    fn push() -> RawEvent {
        RawEvent::new(PUSH, "github")
            .with_event_type("push")
            .with_delivery_id("delivery-1")
    }

    /// Storage whose first hourly increment fails.
    #[derive(Debug, Default)]
    struct FlakyHourly {
        inner: InMemoryStorage,
        failed: AtomicBool,
    }

    impl Storage for FlakyHourly {
        fn save_event(&self, event: &Event) -> RepositoryResult<EventId> {
            self.inner.save_event(event)
        }

        fn find_event(&self, id: &EventId) -> RepositoryResult<Option<Event>> {
            self.inner.find_event(id)
        }

        fn save_metric(&self, metric: Metric) -> RepositoryResult<Metric> {
            self.inner.save_metric(metric)
        }

        fn find_metric(&self, id: &MetricId) -> RepositoryResult<Option<Metric>> {
            self.inner.find_metric(id)
        }

        fn increment_metric(
            &self,
            increment: MetricIncrement,
        ) -> RepositoryResult<IncrementOutcome> {
            if increment.bucket.granularity == Granularity::Hourly
                && !self.failed.swap(true, Ordering::SeqCst)
            {
                return Err(RepositoryError::database("increment_metric", "connection reset"));
            }
            self.inner.increment_metric(increment)
        }

        fn metric_history(
            &self,
            series: &SeriesKey,
            granularity: Granularity,
            limit: usize,
        ) -> RepositoryResult<Vec<Metric>> {
            self.inner.metric_history(series, granularity, limit)
        }

        fn metric_history_before(
            &self,
            series: &SeriesKey,
            granularity: Granularity,
            before: DateTime<Utc>,
            limit: usize,
        ) -> RepositoryResult<Vec<Metric>> {
            self.inner.metric_history_before(series, granularity, before, limit)
        }

        fn save_alert(&self, alert: Alert) -> RepositoryResult<Alert> {
            self.inner.save_alert(alert)
        }

        fn find_alert(&self, id: &AlertId) -> RepositoryResult<Option<Alert>> {
            self.inner.find_alert(id)
        }
    }

    mod stage_tests {
        use super::*;

        #[test]
        fn raw_event_is_stored_and_scheduled() {
            let h = harness();
            let outcome = h.pipeline.store_raw_event(&push()).unwrap();
            let StageOutcome::EventStored { event_id, .. } = outcome else {
                panic!("unexpected outcome {outcome:?}");
            };
            assert_eq!(event_id.as_str(), "delivery-1");
            assert!(h.storage.find_event(&event_id).unwrap().is_some());
            assert_eq!(h.queue.depth(QueueName::EventProcessing).unwrap(), 1);
        }

        #[test]
        fn malformed_payload_is_not_retryable() {
            let h = harness();
            let err = h
                .pipeline
                .store_raw_event(&RawEvent::new("{not json", "github"))
                .unwrap_err();
            assert!(matches!(err, WorkerError::Event(_)));
            assert!(!err.is_retryable());
            assert_eq!(h.queue.depth(QueueName::EventProcessing).unwrap(), 0);
        }

        #[test]
        fn processing_schedules_calculation() {
            let h = harness();
            h.pipeline
                .schedule_calculation(&EventId::new("e-1"))
                .unwrap();
            assert_eq!(h.queue.depth(QueueName::MetricCalculation).unwrap(), 1);
        }

        #[test]
        fn calculation_aggregates_and_schedules_detection() {
            let h = harness();
            h.pipeline.store_raw_event(&push()).unwrap();

            let outcome = h
                .pipeline
                .calculate_metrics(&EventId::new("delivery-1"))
                .unwrap();
            let StageOutcome::Aggregated {
                applied,
                duplicates,
                next,
            } = outcome
            else {
                panic!("unexpected outcome {outcome:?}");
            };
            assert!(applied > 0);
            assert_eq!(duplicates, 0);
            // Three granularities are aggregated; only five-minute rows are checked.
            assert_eq!(applied % 3, 0);
            assert_eq!(next.len(), applied / 3);
            assert_eq!(
                h.queue.depth(QueueName::AnomalyDetection).unwrap(),
                next.len()
            );
        }

        #[test]
        fn replayed_calculation_applies_nothing() {
            let h = harness();
            h.pipeline.store_raw_event(&push()).unwrap();
            let id = EventId::new("delivery-1");
            h.pipeline.calculate_metrics(&id).unwrap();
            let before = h.queue.depth(QueueName::AnomalyDetection).unwrap();

            let outcome = h.pipeline.calculate_metrics(&id).unwrap();
            assert!(matches!(
                outcome,
                StageOutcome::Aggregated { applied: 0, ref next, .. } if next.is_empty()
            ));
            assert_eq!(h.queue.depth(QueueName::AnomalyDetection).unwrap(), before);
        }

        #[test]
        fn retried_calculation_checks_rows_of_failed_attempt() {
            let queue = Arc::new(InMemoryQueue::new());
            let storage = Arc::new(FlakyHourly::default());
            let admission = Arc::new(AdmissionController::new(queue.clone()));
            let pipeline = Pipeline::new(admission, storage.clone(), Arc::new(Dispatcher::new()));
            pipeline.store_raw_event(&push()).unwrap();
            let id = EventId::new("delivery-1");

            // Five-minute rows are applied before the hourly pass fails.
            let err = pipeline.calculate_metrics(&id).unwrap_err();
            assert!(err.is_retryable());
            assert_eq!(queue.depth(QueueName::AnomalyDetection).unwrap(), 0);
            let five_minute_rows = storage
                .inner
                .metrics()
                .into_iter()
                .filter(|m| m.granularity == Granularity::FiveMinutes)
                .count();
            assert!(five_minute_rows > 0);

            let outcome = pipeline
                .handle_attempt(&JobPayload::CalculateMetrics { event_id: id }, 1)
                .unwrap();
            let StageOutcome::Aggregated {
                applied,
                duplicates,
                next,
            } = outcome
            else {
                panic!("unexpected outcome {outcome:?}");
            };
            assert_eq!(duplicates, five_minute_rows);
            assert_eq!(applied, 2 * five_minute_rows);
            assert_eq!(next.len(), five_minute_rows);
            assert_eq!(
                queue.depth(QueueName::AnomalyDetection).unwrap(),
                five_minute_rows
            );
        }

        #[test]
        fn first_attempt_handles_replay_without_detection() {
            let h = harness();
            h.pipeline.store_raw_event(&push()).unwrap();
            let payload = JobPayload::CalculateMetrics {
                event_id: EventId::new("delivery-1"),
            };
            h.pipeline.handle_attempt(&payload, 0).unwrap();
            let before = h.queue.depth(QueueName::AnomalyDetection).unwrap();

            let outcome = h.pipeline.handle_attempt(&payload, 0).unwrap();
            assert!(matches!(outcome, StageOutcome::Aggregated { ref next, .. } if next.is_empty()));
            assert_eq!(h.queue.depth(QueueName::AnomalyDetection).unwrap(), before);
        }

        #[test]
        fn calculation_of_missing_event_is_not_found() {
            let h = harness();
            let err = h
                .pipeline
                .calculate_metrics(&EventId::new("missing"))
                .unwrap_err();
            assert!(
                matches!(err, WorkerError::Repository(ref e) if e.kind() == RepositoryErrorKind::NotFound)
            );
        }

        #[test]
        fn detection_raises_and_notifies() {
            let h = harness();
            let series = SeriesKey::new(
                MetricName::new("node.cpu_usage").unwrap(),
                Dimensions::new().with("host", "web-1"),
            );
            let bucket = BucketKey::for_timestamp(series, Granularity::FiveMinutes, Utc::now());
            let metric = h
                .storage
                .save_metric(Metric::new(&bucket, Source::parse("node"), 95.5))
                .unwrap();

            let outcome = h.pipeline.detect_anomaly(&metric.id).unwrap();
            let StageOutcome::Detected { alert: Some(alert) } = outcome else {
                panic!("expected an alert");
            };
            assert_eq!(alert.severity, AlertSeverity::Warning);
            assert_eq!(alert.threshold, 80.0);
            assert_eq!(h.channel.alerts().len(), 1);
            assert_eq!(h.storage.alerts().len(), 1);
        }

        #[test]
        fn handle_dispatches_by_payload() {
            let h = harness();
            let outcome = h
                .pipeline
                .handle(&JobPayload::ProcessEvent {
                    event_id: EventId::new("e-1"),
                })
                .unwrap();
            assert!(matches!(outcome, StageOutcome::Scheduled { .. }));
        }
    }

    #[test]
    fn ingest_respects_backpressure() {
        let queue = Arc::new(InMemoryQueue::new());
        let limits = pulse_queue::QueueLimits::default().with_max(QueueName::RawEvents, 1);
        let admission = Arc::new(AdmissionController::new(queue).with_limits(limits));
        let pipeline = Pipeline::new(
            admission,
            Arc::new(InMemoryStorage::new()),
            Arc::new(Dispatcher::new()),
        );

        pipeline.ingest(push()).unwrap();
        let err = pipeline.ingest(push()).unwrap_err();
        assert!(matches!(err, WorkerError::Queue(ref e) if e.is_backpressure()));
    }

    #[test]
    fn dispatcher_follows_config() {
        let mut config = NotificationConfig::default();
        assert_eq!(build_dispatcher(&config).channel_count(), 1);

        config.log = false;
        config.webhooks.push(
            pulse_alerts::WebhookConfig::new("ops", "https://hooks.example.com").unwrap(),
        );
        config.webhooks.push(
            pulse_alerts::WebhookConfig::new("oncall", "https://pager.example.com").unwrap(),
        );
        assert_eq!(build_dispatcher(&config).channel_count(), 2);
    }
}
