//! Backpressure-aware admission of raw events.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use pulse_core::{EventId, MetricId, RawEvent};

use crate::backend::{QueueBackend, all_depths};
use crate::error::{QueueError, Result};
use crate::job::{Job, JobId, JobPayload};
use crate::queue::{QueueLimits, QueueName};

/// Gates raw event admission on downstream queue depth.
///
/// Depths are read from the backend on every call; nothing is cached.
/// Admission fails fast with `QueueError::Backpressure` and never blocks or
/// retries internally.
///
/// Only raw event admission is gated. Jobs for later stages belong to
/// events that were already admitted and are always accepted.
pub struct AdmissionController {
    backend: Arc<dyn QueueBackend>,
    limits: QueueLimits,
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl AdmissionController {
    /// Creates a controller with the default limits.
    #[must_use]
    pub fn new(backend: Arc<dyn QueueBackend>) -> Self {
        Self {
            backend,
            limits: QueueLimits::default(),
        }
    }

    /// Replaces the limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: QueueLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Returns the configured limits.
    #[must_use]
    pub const fn limits(&self) -> &QueueLimits {
        &self.limits
    }

    /// Returns the backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn QueueBackend> {
        &self.backend
    }

    /// Returns the live depth of every queue.
    ///
    /// # Errors
    ///
    /// Returns backend errors.
    pub fn queue_depths(&self) -> Result<BTreeMap<QueueName, usize>> {
        all_depths(self.backend.as_ref())
    }

    /// Returns the first queue at or above its maximum, with its depth.
    ///
    /// # Errors
    ///
    /// Returns backend errors.
    pub fn saturated_queue(&self) -> Result<Option<(QueueName, usize)>> {
        for queue in QueueName::ALL {
            let depth = self.backend.depth(queue)?;
            if depth >= self.limits.max_for(queue) {
                return Ok(Some((queue, depth)));
            }
        }
        Ok(None)
    }

    /// Returns true iff at least one queue's depth meets or exceeds its
    /// maximum.
    ///
    /// # Errors
    ///
    /// Returns backend errors.
    pub fn is_backpressured(&self) -> Result<bool> {
        Ok(self.saturated_queue()?.is_some())
    }

    /// Admits a raw event unless a queue is saturated.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Backpressure` without enqueuing anything when
    /// any queue is at its maximum, or backend errors.
    pub fn enqueue_raw_event(&self, raw: RawEvent) -> Result<JobId> {
        if let Some((queue, depth)) = self.saturated_queue()? {
            let max = self.limits.max_for(queue);
            warn!(
                source = %raw.source,
                queue = %queue,
                depth,
                max,
                "rejecting raw event under backpressure"
            );
            return Err(QueueError::Backpressure { queue, depth, max });
        }

        let id = self.backend.enqueue(Job::new(JobPayload::RawEvent { raw }))?;
        debug!(job_id = %id, "raw event admitted");
        Ok(id)
    }

    /// Schedules a stored event for processing.
    ///
    /// # Errors
    ///
    /// Returns backend errors.
    pub fn enqueue_event_processing(&self, event_id: EventId) -> Result<JobId> {
        self.backend
            .enqueue(Job::new(JobPayload::ProcessEvent { event_id }))
    }

    /// Schedules a stored event for classification and aggregation.
    ///
    /// # Errors
    ///
    /// Returns backend errors.
    pub fn enqueue_metric_calculation(&self, event_id: EventId) -> Result<JobId> {
        self.backend
            .enqueue(Job::new(JobPayload::CalculateMetrics { event_id }))
    }

    /// Schedules a stored metric for an anomaly check.
    ///
    /// # Errors
    ///
    /// Returns backend errors.
    pub fn enqueue_anomaly_detection(&self, metric_id: MetricId) -> Result<JobId> {
        self.backend
            .enqueue(Job::new(JobPayload::DetectAnomaly { metric_id }))
    }
}
