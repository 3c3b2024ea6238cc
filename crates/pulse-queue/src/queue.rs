//! Logical queue names and their depth limits.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The pipeline's logical queues, in stage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    /// Raw payloads awaiting parsing.
    RawEvents,
    /// Parsed events awaiting scheduling.
    EventProcessing,
    /// Events awaiting classification and aggregation.
    MetricCalculation,
    /// Metrics awaiting anomaly checks.
    AnomalyDetection,
}

impl QueueName {
    /// Every queue, in stage order.
    pub const ALL: [Self; 4] = [
        Self::RawEvents,
        Self::EventProcessing,
        Self::MetricCalculation,
        Self::AnomalyDetection,
    ];

    /// Returns the queue's wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RawEvents => "raw_events",
            Self::EventProcessing => "event_processing",
            Self::MetricCalculation => "metric_calculation",
            Self::AnomalyDetection => "anomaly_detection",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|q| q.as_str() == s)
            .ok_or_else(|| format!("unknown queue: {s}"))
    }
}

/// Maximum depth per queue. Admission is refused once any queue reaches its
/// maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueLimits {
    /// Limit for `raw_events`.
    pub raw_events: usize,
    /// Limit for `event_processing`.
    pub event_processing: usize,
    /// Limit for `metric_calculation`.
    pub metric_calculation: usize,
    /// Limit for `anomaly_detection`.
    pub anomaly_detection: usize,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            raw_events: 10_000,
            event_processing: 5_000,
            metric_calculation: 5_000,
            anomaly_detection: 2_000,
        }
    }
}

impl QueueLimits {
    /// Returns the limit for one queue.
    #[must_use]
    pub const fn max_for(&self, queue: QueueName) -> usize {
        match queue {
            QueueName::RawEvents => self.raw_events,
            QueueName::EventProcessing => self.event_processing,
            QueueName::MetricCalculation => self.metric_calculation,
            QueueName::AnomalyDetection => self.anomaly_detection,
        }
    }

    /// Sets the limit for one queue.
    #[must_use]
    pub const fn with_max(mut self, queue: QueueName, max: usize) -> Self {
        match queue {
            QueueName::RawEvents => self.raw_events = max,
            QueueName::EventProcessing => self.event_processing = max,
            QueueName::MetricCalculation => self.metric_calculation = max,
            QueueName::AnomalyDetection => self.anomaly_detection = max,
        }
        self
    }
}
