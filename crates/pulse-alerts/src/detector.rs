//! Anomaly detection over aggregated metrics.

use std::sync::Arc;

use tracing::{debug, info, warn};

use pulse_core::{Alert, AlertSeverity, Metric, Notifier, Storage};
use pulse_metrics::trailing_stats;

use crate::error::Result;
use crate::policy::{PolicySet, ThresholdPolicy};

/// A threshold crossing found by [`AnomalyDetector::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Finding {
    /// The threshold the value exceeded.
    pub threshold: f64,
    /// Severity derived from how far it was exceeded.
    pub severity: AlertSeverity,
}

/// The alert name used for anomalies on `metric`.
#[must_use]
pub fn alert_name(metric: &Metric) -> String {
    format!("{}_anomaly", metric.name)
}

/// Checks aggregated metrics against their threshold policy.
///
/// Detection never mutates the metric it evaluates. A triggered alert is
/// persisted before notification, and a notification failure leaves the
/// alert in place.
pub struct AnomalyDetector {
    storage: Arc<dyn Storage>,
    notifier: Arc<dyn Notifier>,
    policies: PolicySet,
}

impl std::fmt::Debug for AnomalyDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnomalyDetector")
            .field("policies", &self.policies)
            .finish_non_exhaustive()
    }
}

impl AnomalyDetector {
    /// Creates a detector with the default policies.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            storage,
            notifier,
            policies: PolicySet::default(),
        }
    }

    /// Replaces the policy set.
    #[must_use]
    pub fn with_policies(mut self, policies: PolicySet) -> Self {
        self.policies = policies;
        self
    }

    /// Returns the policy set.
    #[must_use]
    pub const fn policies(&self) -> &PolicySet {
        &self.policies
    }

    /// Resolves the threshold that applies to `metric`.
    ///
    /// Static policies answer directly. Statistical policies read the
    /// series' buckets strictly before this one; `Ok(None)` means there is
    /// not enough history for a verdict.
    ///
    /// # Errors
    ///
    /// Returns storage errors from the history read.
    pub fn threshold_for(&self, metric: &Metric) -> Result<Option<f64>> {
        let policy = self.policies.policy_for(&metric.name);
        let ThresholdPolicy::Statistical { .. } = policy else {
            return Ok(policy.threshold(None));
        };

        let window = policy.window();
        let mut history: Vec<f64> = self
            .storage
            .metric_history_before(
                &metric.series_key(),
                metric.granularity,
                metric.recorded_at,
                window,
            )?
            .into_iter()
            .map(|row| row.value)
            .collect();
        history.reverse();

        let stats = trailing_stats(&history);
        Ok(policy.threshold(stats.as_ref()))
    }

    /// Decides whether `metric` is anomalous without persisting anything.
    ///
    /// # Errors
    ///
    /// Returns storage errors from the history read.
    pub fn evaluate(&self, metric: &Metric) -> Result<Option<Finding>> {
        let Some(threshold) = self.threshold_for(metric)? else {
            debug!(metric = %metric.name, "not enough history for a threshold");
            return Ok(None);
        };

        Ok(self
            .policies
            .severity(metric.value, threshold)
            .map(|severity| Finding {
                threshold,
                severity,
            }))
    }

    /// Evaluates `metric` and, when it exceeds its threshold, persists and
    /// announces an alert.
    ///
    /// Returns `Ok(None)` in the common case of no anomaly.
    ///
    /// # Errors
    ///
    /// Returns storage errors. Notification errors are logged, not returned.
    pub fn detect(&self, metric: &Metric) -> Result<Option<Alert>> {
        let Some(finding) = self.evaluate(metric)? else {
            return Ok(None);
        };

        let alert = Alert::new(
            alert_name(metric),
            finding.severity,
            metric.clone(),
            finding.threshold,
        );
        let alert = self.storage.save_alert(alert)?;

        info!(
            alert_id = %alert.id,
            metric = %metric.name,
            value = metric.value,
            threshold = finding.threshold,
            severity = %finding.severity,
            "anomaly detected"
        );

        if let Err(err) = self.notifier.send_alert(&alert) {
            warn!(alert_id = %alert.id, error = %err, "alert notification failed");
        }

        Ok(Some(alert))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{Dispatcher, MemoryChannel, NotificationChannel};
    use crate::policy::{DetectionConfig, PolicyRule};
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;
    use pulse_core::{
        AlertStatus, BucketKey, Dimensions, Granularity, MetricIncrement, MetricName,
        NotificationError, NotificationResult, SeriesKey, Source,
    };
    use pulse_metrics::InMemoryStorage;

    fn metric_at(name: &str, minute: u32, value: f64) -> Metric {
        let series = SeriesKey::new(
            MetricName::new(name).unwrap(),
            Dimensions::new().with("host", "web-1"),
        );
        let bucket = BucketKey::for_timestamp(
            series,
            Granularity::FiveMinutes,
            Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap(),
        );
        Metric::new(&bucket, Source::Custom("host".to_string()), value)
    }

    fn seed(storage: &InMemoryStorage, name: &str, values: &[f64]) {
        for (i, value) in values.iter().enumerate() {
            let metric = metric_at(name, u32::try_from(i * 5).unwrap(), *value);
            storage
                .increment_metric(MetricIncrement {
                    bucket: metric.bucket_key(),
                    source: metric.source.clone(),
                    delta: *value,
                    dedup_key: format!("seed-{i}"),
                })
                .unwrap();
        }
    }

    fn setup() -> (Arc<InMemoryStorage>, Arc<MemoryChannel>, AnomalyDetector) {
        let storage = Arc::new(InMemoryStorage::new());
        let channel = Arc::new(MemoryChannel::new("memory"));
        let dispatcher = Arc::new(Dispatcher::new().with_channel(channel.clone()));
        let detector = AnomalyDetector::new(storage.clone(), dispatcher);
        (storage, channel, detector)
    }

    #[derive(Debug)]
    struct DownChannel;

    impl NotificationChannel for DownChannel {
        fn name(&self) -> &str {
            "down"
        }
        fn send(&self, _alert: &Alert) -> NotificationResult<()> {
            Err(NotificationError::DeliveryFailed {
                channel: "down".to_string(),
                reason: "timeout".to_string(),
            })
        }
        fn send_text(&self, _text: &str) -> NotificationResult<()> {
            Ok(())
        }
    }

    mod static_tests {
        use super::*;
        use test_case::test_case;

        #[test_case(79.9, None ; "below threshold")]
        #[test_case(80.0, None ; "at threshold")]
        #[test_case(80.1, Some(AlertSeverity::Warning) ; "just above")]
        #[test_case(95.5, Some(AlertSeverity::Warning) ; "cpu at 95.5")]
        #[test_case(160.0, Some(AlertSeverity::Critical) ; "double threshold")]
        fn cpu_boundaries(value: f64, expected: Option<AlertSeverity>) {
            let (_storage, _channel, detector) = setup();
            let finding = detector.evaluate(&metric_at("host.cpu_usage", 0, value)).unwrap();
            assert_eq!(finding.map(|f| f.severity), expected);
        }

        #[test]
        fn memory_uses_its_own_threshold() {
            let (_storage, _channel, detector) = setup();
            let finding = detector
                .evaluate(&metric_at("host.memory_percent", 0, 76.0))
                .unwrap()
                .unwrap();
            assert!((finding.threshold - 75.0).abs() < f64::EPSILON);
        }

        #[test]
        fn detect_persists_and_notifies() {
            let (storage, channel, detector) = setup();
            let metric = metric_at("host.cpu_usage", 0, 95.5);
            let alert = detector.detect(&metric).unwrap().unwrap();

            assert_eq!(alert.name, "host.cpu_usage_anomaly");
            assert_eq!(alert.status, AlertStatus::Active);
            assert_eq!(alert.metric, metric);
            assert!((alert.threshold - 80.0).abs() < f64::EPSILON);
            assert_eq!(storage.require_alert(&alert.id).unwrap(), alert);
            assert_eq!(channel.alerts(), vec![alert]);
        }

        #[test]
        fn no_anomaly_writes_nothing() {
            let (storage, channel, detector) = setup();
            assert!(detector.detect(&metric_at("host.cpu_usage", 0, 50.0)).unwrap().is_none());
            assert!(storage.alerts().is_empty());
            assert!(channel.alerts().is_empty());
        }

        #[test]
        fn notification_failure_keeps_alert() {
            let storage = Arc::new(InMemoryStorage::new());
            let dispatcher = Arc::new(Dispatcher::new().with_channel(DownChannel));
            let detector = AnomalyDetector::new(storage.clone(), dispatcher);

            let alert = detector
                .detect(&metric_at("host.cpu_usage", 0, 99.0))
                .unwrap()
                .unwrap();
            assert_eq!(storage.require_alert(&alert.id).unwrap().id, alert.id);
        }

        #[test]
        fn custom_policies() {
            let (_storage, _channel, detector) = setup();
            let config = DetectionConfig {
                rules: vec![PolicyRule::new("latency", ThresholdPolicy::fixed(500.0))],
                ..DetectionConfig::default()
            };
            let detector = detector.with_policies(PolicySet::compile(&config).unwrap());
            let finding = detector
                .evaluate(&metric_at("api.latency_ms", 0, 1200.0))
                .unwrap()
                .unwrap();
            assert_eq!(finding.severity, AlertSeverity::Critical);
        }
    }

    mod statistical_tests {
        use super::*;

        #[test]
        fn too_little_history_is_no_verdict() {
            let (storage, _channel, detector) = setup();
            seed(&storage, "github.push_count", &[1.0, 2.0, 1.0]);
            let metric = metric_at("github.push_count", 15, 1000.0);
            assert_eq!(detector.threshold_for(&metric).unwrap(), None);
            assert!(detector.detect(&metric).unwrap().is_none());
        }

        #[test]
        fn spike_over_trailing_mean() {
            let (storage, _channel, detector) = setup();
            seed(&storage, "github.push_count", &[10.0, 12.0, 11.0, 9.0, 10.0, 12.0]);
            let metric = metric_at("github.push_count", 30, 40.0);
            let finding = detector.evaluate(&metric).unwrap().unwrap();
            assert!(finding.threshold > 11.0 && finding.threshold < 40.0);
        }

        #[test]
        fn normal_value_is_quiet() {
            let (storage, _channel, detector) = setup();
            seed(&storage, "github.push_count", &[10.0, 12.0, 11.0, 9.0, 10.0, 12.0]);
            let metric = metric_at("github.push_count", 30, 11.0);
            assert!(detector.evaluate(&metric).unwrap().is_none());
        }

        #[test]
        fn current_bucket_is_excluded_from_history() {
            let (storage, _channel, detector) = setup();
            seed(&storage, "github.push_count", &[10.0, 10.0, 10.0, 10.0, 10.0, 500.0]);
            // The 500 row is the metric being judged; its own value must not
            // widen the threshold.
            let stored = storage
                .find_bucket(&metric_at("github.push_count", 25, 0.0).bucket_key())
                .unwrap();
            let threshold = detector.threshold_for(&stored).unwrap().unwrap();
            assert!((threshold - 10.0).abs() < f64::EPSILON);
            assert!(detector.evaluate(&stored).unwrap().is_some());
        }

        #[test]
        fn late_check_uses_history_before_its_bucket() {
            let (storage, _channel, detector) = setup();
            let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
            let mut values = vec![10.0; 5];
            values.push(500.0);
            // Far more newer rows than the window holds.
            values.extend(std::iter::repeat_n(1000.0, 30));
            for (i, value) in values.iter().enumerate() {
                let minutes = i64::try_from(i * 5).unwrap();
                let bucket = BucketKey::for_timestamp(
                    SeriesKey::new(
                        MetricName::new("github.push_count").unwrap(),
                        Dimensions::new().with("host", "web-1"),
                    ),
                    Granularity::FiveMinutes,
                    start + chrono::Duration::minutes(minutes),
                );
                storage
                    .increment_metric(MetricIncrement {
                        bucket,
                        source: Source::Custom("host".to_string()),
                        delta: *value,
                        dedup_key: format!("late-{i}"),
                    })
                    .unwrap();
            }

            let judged = storage
                .find_bucket(&metric_at("github.push_count", 25, 0.0).bucket_key())
                .unwrap();
            assert_eq!(judged.value, 500.0);
            let threshold = detector.threshold_for(&judged).unwrap().unwrap();
            assert!((threshold - 10.0).abs() < f64::EPSILON);
            assert!(detector.evaluate(&judged).unwrap().is_some());
        }
    }

    proptest! {
        #[test]
        fn detection_never_mutates_metric(value in -1e6f64..1e6) {
            let (_storage, _channel, detector) = setup();
            let metric = metric_at("host.cpu_usage", 0, value);
            let before = metric.clone();
            let result = detector.detect(&metric).unwrap();
            prop_assert_eq!(&metric, &before);
            prop_assert_eq!(result.is_some(), value > 80.0);
        }
    }
}
