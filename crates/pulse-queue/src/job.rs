//! Units of work and their lifecycle.
//!
//! A job moves `received → queued → processing → processed`, or on failure
//! `processing → failed → queued` again until the retry budget runs out and
//! it is moved to `dead`. Dead jobs are kept for inspection, never dropped.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pulse_core::{EventId, MetricId, RawEvent};

use crate::error::{QueueError, Result};
use crate::queue::QueueName;

/// Unique job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
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

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a job is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Created, not yet in a queue.
    Received,
    /// Waiting in a queue.
    Queued,
    /// Claimed by a worker.
    Processing,
    /// Finished successfully.
    Processed,
    /// The last attempt raised.
    Failed,
    /// Retry budget exhausted.
    Dead,
}

impl JobState {
    /// Checks if a transition to the target state is valid.
    #[must_use]
    pub const fn can_transition_to(&self, target: &Self) -> bool {
        use JobState::{Dead, Failed, Processed, Processing, Queued, Received};

        matches!(
            (self, target),
            (Received | Failed, Queued)
                | (Queued, Processing)
                | (Processing, Processed | Failed)
                | (Failed, Dead)
        )
    }

    /// Returns true for `processed` and `dead`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Processed | Self::Dead)
    }

    /// Returns the state's name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Failed => "failed",
            Self::Dead => "dead",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a job carries. Each payload belongs to exactly one queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    /// An unparsed webhook delivery.
    RawEvent {
        /// The raw delivery.
        raw: RawEvent,
    },
    /// A stored event to schedule for classification.
    ProcessEvent {
        /// The stored event.
        event_id: EventId,
    },
    /// A stored event to classify and aggregate.
    CalculateMetrics {
        /// The stored event.
        event_id: EventId,
    },
    /// A stored metric to check for anomalies.
    DetectAnomaly {
        /// The stored metric.
        metric_id: MetricId,
    },
}

impl JobPayload {
    /// Returns the queue this payload belongs to.
    #[must_use]
    pub const fn queue(&self) -> QueueName {
        match self {
            Self::RawEvent { .. } => QueueName::RawEvents,
            Self::ProcessEvent { .. } => QueueName::EventProcessing,
            Self::CalculateMetrics { .. } => QueueName::MetricCalculation,
            Self::DetectAnomaly { .. } => QueueName::AnomalyDetection,
        }
    }
}

/// A unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Identifier.
    pub id: JobId,
    /// The work.
    pub payload: JobPayload,
    /// Lifecycle state.
    pub state: JobState,
    /// Number of times processing started.
    pub attempts: u32,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// Earliest time the job may be claimed again.
    pub not_before: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a job in the `received` state.
    #[must_use]
    pub fn new(payload: JobPayload) -> Self {
        Self {
            id: JobId::generate(),
            payload,
            state: JobState::Received,
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
            not_before: None,
        }
    }

    /// Returns the queue the job belongs to.
    #[must_use]
    pub const fn queue(&self) -> QueueName {
        self.payload.queue()
    }

    /// Returns true if the job may be claimed at `now`.
    #[must_use]
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Queued && self.not_before.is_none_or(|at| at <= now)
    }

    fn transition_to(&mut self, target: JobState) -> Result<()> {
        if self.state.can_transition_to(&target) {
            self.state = target;
            Ok(())
        } else {
            Err(QueueError::InvalidStateTransition {
                from: self.state.to_string(),
                to: target.to_string(),
            })
        }
    }

    /// Places the job in its queue.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::InvalidStateTransition` unless the job is
    /// `received`.
    pub fn enqueue(&mut self) -> Result<()> {
        if self.state != JobState::Received {
            return Err(QueueError::InvalidStateTransition {
                from: self.state.to_string(),
                to: JobState::Queued.to_string(),
            });
        }
        self.transition_to(JobState::Queued)
    }

    /// Claims the job and counts the attempt.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::InvalidStateTransition` unless the job is queued.
    pub fn start(&mut self) -> Result<()> {
        self.transition_to(JobState::Processing)?;
        self.attempts += 1;
        self.not_before = None;
        Ok(())
    }

    /// Marks the job as done.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::InvalidStateTransition` unless the job is
    /// processing.
    pub fn complete(&mut self) -> Result<()> {
        self.transition_to(JobState::Processed)
    }

    /// Records a failed attempt.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::InvalidStateTransition` unless the job is
    /// processing.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition_to(JobState::Failed)?;
        self.last_error = Some(error.into());
        Ok(())
    }

    /// Puts a failed job back in its queue, claimable from `not_before`.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::InvalidStateTransition` unless the job failed.
    pub fn retry_at(&mut self, not_before: DateTime<Utc>) -> Result<()> {
        if self.state != JobState::Failed {
            return Err(QueueError::InvalidStateTransition {
                from: self.state.to_string(),
                to: JobState::Queued.to_string(),
            });
        }
        self.transition_to(JobState::Queued)?;
        self.not_before = Some(not_before);
        Ok(())
    }

    /// Moves a failed job to the dead state.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::InvalidStateTransition` unless the job failed.
    pub fn bury(&mut self) -> Result<()> {
        self.transition_to(JobState::Dead)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use test_case::test_case;

    fn job() -> Job {
        Job::new(JobPayload::ProcessEvent {
            event_id: EventId::new("e1"),
        })
    }

    mod state_tests {
        use super::*;
        use test_case::test_case;

        #[test_case(JobState::Received, JobState::Queued, true ; "received to queued")]
        #[test_case(JobState::Queued, JobState::Processing, true ; "queued to processing")]
        #[test_case(JobState::Processing, JobState::Processed, true ; "processing to processed")]
        #[test_case(JobState::Processing, JobState::Failed, true ; "processing to failed")]
        #[test_case(JobState::Failed, JobState::Queued, true ; "failed to queued")]
        #[test_case(JobState::Failed, JobState::Dead, true ; "failed to dead")]
        #[test_case(JobState::Received, JobState::Processing, false ; "skip queue")]
        #[test_case(JobState::Processed, JobState::Queued, false ; "processed is terminal")]
        #[test_case(JobState::Dead, JobState::Queued, false ; "dead is terminal")]
        #[test_case(JobState::Queued, JobState::Dead, false ; "queued cannot die")]
        fn transitions(from: JobState, to: JobState, valid: bool) {
            assert_eq!(from.can_transition_to(&to), valid);
        }

        #[test]
        fn terminal_states() {
            assert!(JobState::Processed.is_terminal());
            assert!(JobState::Dead.is_terminal());
            assert!(!JobState::Failed.is_terminal());
        }
    }

    mod lifecycle_tests {
        use super::*;

        #[test]
        fn happy_path() {
            let mut job = job();
            job.enqueue().unwrap();
            job.start().unwrap();
            job.complete().unwrap();
            assert_eq!(job.state, JobState::Processed);
            assert_eq!(job.attempts, 1);
        }

        #[test]
        fn retry_then_bury() {
            let mut job = job();
            job.enqueue().unwrap();
            job.start().unwrap();
            job.fail("boom").unwrap();
            assert_eq!(job.last_error.as_deref(), Some("boom"));

            let later = Utc::now() + Duration::seconds(5);
            job.retry_at(later).unwrap();
            assert!(!job.is_ready(Utc::now()));
            assert!(job.is_ready(later));

            job.start().unwrap();
            job.fail("boom again").unwrap();
            job.bury().unwrap();
            assert_eq!(job.state, JobState::Dead);
            assert_eq!(job.attempts, 2);
        }

        #[test]
        fn cannot_complete_unclaimed_job() {
            let mut job = job();
            job.enqueue().unwrap();
            let err = job.complete().unwrap_err();
            assert_eq!(
                err,
                QueueError::InvalidStateTransition {
                    from: "queued".to_string(),
                    to: "processed".to_string(),
                }
            );
        }

        #[test]
        fn retry_requires_failure() {
            let mut job = job();
            assert!(job.retry_at(Utc::now()).is_err());
            job.enqueue().unwrap();
            assert!(job.enqueue().is_err());
        }
    }

    #[test_case(JobPayload::RawEvent { raw: RawEvent::new("{}", "github") }, QueueName::RawEvents ; "raw")]
    #[test_case(JobPayload::ProcessEvent { event_id: EventId::new("e") }, QueueName::EventProcessing ; "process")]
    #[test_case(JobPayload::CalculateMetrics { event_id: EventId::new("e") }, QueueName::MetricCalculation ; "calculate")]
    #[test_case(JobPayload::DetectAnomaly { metric_id: MetricId::new("m") }, QueueName::AnomalyDetection ; "detect")]
    fn payload_queue(payload: JobPayload, queue: QueueName) {
        assert_eq!(Job::new(payload).queue(), queue);
    }

    #[test]
    fn payload_serializes_with_tag() {
        let json = serde_json::to_string(&JobPayload::DetectAnomaly {
            metric_id: MetricId::new("m-1"),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"detect_anomaly","metric_id":"m-1"}"#);
    }
}
