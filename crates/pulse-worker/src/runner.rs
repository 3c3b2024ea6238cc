//! The worker loop.
//!
//! A [`Worker`] pulls batches from every queue in pipeline order, hands each
//! job to its stage handler and settles the outcome with the backend:
//! success completes the job, failure retries it with backoff until the
//! retry budget is spent, then dead-letters it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use pulse_core::Storage;
use pulse_metrics::InMemoryMetricCache;
use pulse_queue::{AdmissionController, Job, QueueBackend, QueueName, RetryPolicy};

use crate::config::{BatchConfig, PulseConfig};
use crate::error::{Result, WorkerError};
use crate::pipeline::{Pipeline, build_dispatcher};

/// Counts from one pass over the queues.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundReport {
    /// Jobs that succeeded.
    pub processed: usize,
    /// Jobs that failed and were put back.
    pub retried: usize,
    /// Jobs that failed for the last time.
    pub dead_lettered: usize,
}

impl RoundReport {
    /// Returns the number of jobs claimed.
    #[must_use]
    pub const fn claimed(&self) -> usize {
        self.processed + self.retried + self.dead_lettered
    }

    /// Returns true if no job was claimed.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.claimed() == 0
    }
}

/// Drives jobs through the pipeline.
pub struct Worker {
    pipeline: Arc<Pipeline>,
    backend: Arc<dyn QueueBackend>,
    retry: RetryPolicy,
    batch: BatchConfig,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("retry", &self.retry)
            .field("batch", &self.batch)
            .finish_non_exhaustive()
    }
}

impl Worker {
    /// Creates a worker with the default retry and batch settings.
    ///
    /// `backend` must be the backend the pipeline's admission controller
    /// enqueues into.
    #[must_use]
    pub fn new(pipeline: Arc<Pipeline>, backend: Arc<dyn QueueBackend>) -> Self {
        Self {
            pipeline,
            backend,
            retry: RetryPolicy::default(),
            batch: BatchConfig::default(),
        }
    }

    /// Wires a worker and its pipeline from `config`.
    ///
    /// The metric cache is in-memory; notification channels follow
    /// `config.notifications`.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::Alert` if the detection policies do not
    /// compile.
    pub fn from_config(
        config: &PulseConfig,
        backend: Arc<dyn QueueBackend>,
        storage: Arc<dyn Storage>,
    ) -> Result<Self> {
        let admission =
            Arc::new(AdmissionController::new(backend.clone()).with_limits(config.queue_limits));
        let cache = Arc::new(InMemoryMetricCache::with_config(config.cache.clone()));
        let notifier = Arc::new(build_dispatcher(&config.notifications));
        let pipeline = Pipeline::from_config(config, admission, storage, cache, notifier)?;

        Ok(Self::new(Arc::new(pipeline), backend)
            .with_retry(config.retry.clone())
            .with_batch(config.batch))
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replaces the batch settings.
    #[must_use]
    pub const fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    /// Returns the pipeline.
    #[must_use]
    pub const fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Processes up to `batch_size` ready jobs from each queue, in pipeline
    /// order.
    ///
    /// Stage failures are settled here and never returned. Every claimed
    /// job is settled before a backend error is returned.
    ///
    /// # Errors
    ///
    /// Returns the first queue backend error.
    pub fn run_once(&self) -> Result<RoundReport> {
        let mut report = RoundReport::default();
        for queue in QueueName::ALL {
            let mut first_err = None;
            for job in self.claim_batch(queue)? {
                let job_id = job.id.clone();
                if let Err(err) = self.process(job, &mut report) {
                    error!(job_id = %job_id, queue = %queue, error = %err, "failed to settle job");
                    first_err.get_or_insert(err);
                }
            }
            if let Some(err) = first_err {
                return Err(err);
            }
        }

        if !report.is_empty() {
            debug!(
                processed = report.processed,
                retried = report.retried,
                dead_lettered = report.dead_lettered,
                "worker round finished"
            );
        }
        Ok(report)
    }

    // A job requeued during this round is not claimed again until the next.
    fn claim_batch(&self, queue: QueueName) -> Result<Vec<Job>> {
        let mut batch = Vec::new();
        while batch.len() < self.batch.batch_size {
            match self.backend.dequeue(queue)? {
                Some(job) => batch.push(job),
                None => break,
            }
        }
        Ok(batch)
    }

    fn process(&self, job: Job, report: &mut RoundReport) -> Result<()> {
        // `attempts` already counts this claim.
        match self
            .pipeline
            .handle_attempt(&job.payload, job.attempts.saturating_sub(1))
        {
            Ok(_) => {
                self.backend.complete(job)?;
                report.processed += 1;
            }
            Err(err) => self.settle_failure(job, &err, report)?,
        }
        Ok(())
    }

    fn settle_failure(
        &self,
        mut job: Job,
        err: &WorkerError,
        report: &mut RoundReport,
    ) -> Result<()> {
        job.fail(err.to_string())?;

        if err.is_retryable() && self.retry.should_retry(job.attempts) {
            let delay = self.retry.delay_for_retry(job.attempts);
            warn!(
                job_id = %job.id,
                queue = %job.queue(),
                attempt = job.attempts,
                delay_ms = delay.as_millis(),
                error = %err,
                "job failed, retrying"
            );
            job.retry_at(retry_time(Utc::now(), delay))?;
            self.backend.requeue(job)?;
            report.retried += 1;
        } else {
            warn!(
                job_id = %job.id,
                queue = %job.queue(),
                attempts = job.attempts,
                retryable = err.is_retryable(),
                error = %err,
                "job failed permanently"
            );
            job.bury()?;
            self.backend.dead_letter(job)?;
            report.dead_lettered += 1;
        }
        Ok(())
    }

    /// Runs rounds until `shutdown` becomes true or its sender is dropped.
    ///
    /// After `max_empty_batches` consecutive empty rounds the worker sleeps
    /// for `idle_backoff` instead of polling.
    ///
    /// # Errors
    ///
    /// Backend errors are logged and treated as an empty round; this only
    /// returns `Ok`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            batch_size = self.batch.batch_size,
            max_retries = self.retry.max_retries,
            "worker started"
        );

        let mut empty_rounds = 0u32;
        while !*shutdown.borrow() {
            let report = self.run_once().unwrap_or_else(|err| {
                error!(error = %err, "worker round failed");
                RoundReport::default()
            });

            if report.is_empty() {
                empty_rounds += 1;
            } else {
                empty_rounds = 0;
            }

            if empty_rounds < self.batch.max_empty_batches {
                tokio::task::yield_now().await;
                continue;
            }

            debug!(
                idle_ms = self.batch.idle_backoff_ms,
                "queues idle, backing off"
            );
            empty_rounds = 0;
            tokio::select! {
                () = tokio::time::sleep(self.batch.idle_backoff()) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("worker stopped");
        Ok(())
    }
}

fn retry_time(now: DateTime<Utc>, delay: std::time::Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
