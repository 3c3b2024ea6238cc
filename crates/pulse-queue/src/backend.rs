//! The queueing collaborator and an in-memory implementation.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{QueueError, Result};
use crate::job::{Job, JobId, JobState};
use crate::queue::QueueName;

/// A durable set of named FIFO queues.
///
/// Depths are live: every call reads the backend's own counters.
pub trait QueueBackend: Send + Sync {
    /// Adds a `received` job to its queue and returns its id.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::InvalidStateTransition` for a job not in the
    /// `received` state, or a backend error.
    fn enqueue(&self, job: Job) -> Result<JobId>;

    /// Claims the oldest ready job of `queue`, moving it to `processing`.
    ///
    /// # Errors
    ///
    /// Returns backend errors.
    fn dequeue(&self, queue: QueueName) -> Result<Option<Job>>;

    /// Records a claimed job as finished.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::JobNotFound` if the job was not claimed.
    fn complete(&self, job: Job) -> Result<()>;

    /// Returns a claimed, failed job to its queue. The job must already be
    /// `queued` via [`Job::retry_at`].
    ///
    /// # Errors
    ///
    /// Returns `QueueError::JobNotFound` if the job was not claimed.
    fn requeue(&self, job: Job) -> Result<()>;

    /// Stores a claimed job that exhausted its retries.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::JobNotFound` if the job was not claimed.
    fn dead_letter(&self, job: Job) -> Result<()>;

    /// Returns the number of jobs waiting in `queue`.
    ///
    /// # Errors
    ///
    /// Returns backend errors.
    fn depth(&self, queue: QueueName) -> Result<usize>;

    /// Returns the number of claimed jobs of `queue`.
    ///
    /// # Errors
    ///
    /// Returns backend errors.
    fn in_flight(&self, queue: QueueName) -> Result<usize>;

    /// Returns every dead-lettered job.
    ///
    /// # Errors
    ///
    /// Returns backend errors.
    fn dead_letters(&self) -> Result<Vec<Job>>;
}

#[derive(Debug, Default)]
struct QueueState {
    pending: HashMap<QueueName, VecDeque<Job>>,
    in_flight: HashMap<JobId, QueueName>,
    dead: Vec<Job>,
    processed: usize,
}

impl QueueState {
    fn release(&mut self, id: &JobId) -> Result<QueueName> {
        self.in_flight
            .remove(id)
            .ok_or_else(|| QueueError::JobNotFound { id: id.to_string() })
    }
}

/// Thread-safe in-memory queue backend.
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    state: Mutex<QueueState>,
}

impl InMemoryQueue {
    /// Creates empty queues.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of jobs completed since creation.
    #[must_use]
    pub fn processed_count(&self) -> usize {
        self.state.lock().processed
    }

    /// Returns a copy of the jobs waiting in `queue`, oldest first.
    #[must_use]
    pub fn pending(&self, queue: QueueName) -> Vec<Job> {
        self.state
            .lock()
            .pending
            .get(&queue)
            .map(|jobs| jobs.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl QueueBackend for InMemoryQueue {
    fn enqueue(&self, mut job: Job) -> Result<JobId> {
        job.enqueue()?;
        let id = job.id.clone();
        let queue = job.queue();
        self.state
            .lock()
            .pending
            .entry(queue)
            .or_default()
            .push_back(job);
        debug!(job_id = %id, queue = %queue, "job enqueued");
        Ok(id)
    }

    fn dequeue(&self, queue: QueueName) -> Result<Option<Job>> {
        let now = Utc::now();
        let mut state = self.state.lock();
        let Some(jobs) = state.pending.get_mut(&queue) else {
            return Ok(None);
        };
        let Some(position) = jobs.iter().position(|job| job.is_ready(now)) else {
            return Ok(None);
        };
        let Some(mut job) = jobs.remove(position) else {
            return Ok(None);
        };
        job.start()?;
        state.in_flight.insert(job.id.clone(), queue);
        Ok(Some(job))
    }

    fn complete(&self, mut job: Job) -> Result<()> {
        job.complete()?;
        let mut state = self.state.lock();
        state.release(&job.id)?;
        state.processed += 1;
        Ok(())
    }

    fn requeue(&self, job: Job) -> Result<()> {
        if job.state != JobState::Queued {
            return Err(QueueError::InvalidStateTransition {
                from: job.state.to_string(),
                to: JobState::Queued.to_string(),
            });
        }
        let mut state = self.state.lock();
        let queue = state.release(&job.id)?;
        debug!(job_id = %job.id, queue = %queue, attempts = job.attempts, "job requeued");
        state.pending.entry(queue).or_default().push_back(job);
        Ok(())
    }

    fn dead_letter(&self, job: Job) -> Result<()> {
        if job.state != JobState::Dead {
            return Err(QueueError::InvalidStateTransition {
                from: job.state.to_string(),
                to: JobState::Dead.to_string(),
            });
        }
        let mut state = self.state.lock();
        let queue = state.release(&job.id)?;
        warn!(
            job_id = %job.id,
            queue = %queue,
            attempts = job.attempts,
            error = job.last_error.as_deref().unwrap_or_default(),
            "job dead-lettered"
        );
        state.dead.push(job);
        Ok(())
    }

    fn depth(&self, queue: QueueName) -> Result<usize> {
        Ok(self
            .state
            .lock()
            .pending
            .get(&queue)
            .map_or(0, VecDeque::len))
    }

    fn in_flight(&self, queue: QueueName) -> Result<usize> {
        Ok(self
            .state
            .lock()
            .in_flight
            .values()
            .filter(|q| **q == queue)
            .count())
    }

    fn dead_letters(&self) -> Result<Vec<Job>> {
        Ok(self.state.lock().dead.clone())
    }
}

/// Reads the depth of every queue.
///
/// # Errors
///
/// Returns the first backend error.
pub fn all_depths(backend: &dyn QueueBackend) -> Result<BTreeMap<QueueName, usize>> {
    QueueName::ALL
        .into_iter()
        .map(|queue| backend.depth(queue).map(|depth| (queue, depth)))
        .collect()
}
