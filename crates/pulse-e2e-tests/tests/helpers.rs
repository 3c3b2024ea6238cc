//! Test helpers for E2E tests.

#![allow(dead_code)]

use std::sync::Arc;

use pulse_alerts::{Dispatcher, MemoryChannel};
use pulse_core::{Granularity, Metric, RawEvent};
use pulse_metrics::{InMemoryMetricCache, InMemoryStorage};
use pulse_queue::{AdmissionController, InMemoryQueue, RetryPolicy};
use pulse_worker::{Pipeline, PulseConfig, RoundReport, Worker};

/// Upper bound on rounds when draining; a pipeline that needs more is stuck.
pub const MAX_ROUNDS: usize = 32;

/// A push touching a model and the README, at 10:02 on 2024-03-01.
pub const PUSH: &str = r#"{
    "ref": "refs/heads/main",
    "repository": {"full_name": "octocat/hello-world"},
    "pusher": {"name": "octocat"},
    "head_commit": {"timestamp": "2024-03-01T10:02:00Z"},
    "commits": [{"added": ["app/models/x.rb"], "modified": ["README.md"]}]
}"#;

/// A full in-memory pipeline with a recording notification channel.
pub struct TestPipeline {
    pub queue: Arc<InMemoryQueue>,
    pub storage: Arc<InMemoryStorage>,
    pub channel: Arc<MemoryChannel>,
    pub worker: Worker,
}

impl TestPipeline {
    /// Builds a pipeline with default settings and instant retries.
    pub fn start() -> Self {
        let mut config = PulseConfig::default();
        config.retry = instant_retries();
        Self::start_with(config)
    }

    /// Builds a pipeline from `config`, notifying a memory channel.
    pub fn start_with(config: PulseConfig) -> Self {
        config.validate().unwrap();

        let queue = Arc::new(InMemoryQueue::new());
        let storage = Arc::new(InMemoryStorage::new());
        let channel = Arc::new(MemoryChannel::new("memory"));

        let admission =
            Arc::new(AdmissionController::new(queue.clone()).with_limits(config.queue_limits));
        let cache = Arc::new(InMemoryMetricCache::with_config(config.cache.clone()));
        let dispatcher = Arc::new(Dispatcher::new().with_channel(channel.clone()));
        let pipeline =
            Pipeline::from_config(&config, admission, storage.clone(), cache, dispatcher).unwrap();
        let worker = Worker::new(Arc::new(pipeline), queue.clone())
            .with_retry(config.retry.clone())
            .with_batch(config.batch);

        Self {
            queue,
            storage,
            channel,
            worker,
        }
    }

    /// Admits a raw delivery.
    pub fn ingest(&self, raw: RawEvent) {
        self.worker.pipeline().ingest(raw).unwrap();
    }

    /// Runs rounds until one claims nothing; returns the summed report.
    pub fn drain(&self) -> RoundReport {
        let mut total = RoundReport::default();
        for _ in 0..MAX_ROUNDS {
            let report = self.worker.run_once().unwrap();
            if report.is_empty() {
                return total;
            }
            total.processed += report.processed;
            total.retried += report.retried;
            total.dead_lettered += report.dead_lettered;
        }
        panic!("pipeline did not drain in {MAX_ROUNDS} rounds");
    }

    /// Returns the stored rows named `name` at `granularity`.
    pub fn rows(&self, name: &str, granularity: Granularity) -> Vec<Metric> {
        self.storage
            .metrics()
            .into_iter()
            .filter(|m| m.name.as_str() == name && m.granularity == granularity)
            .collect()
    }

    /// Returns `(dimension value, row value)` for five-minute rows of
    /// `name`, sorted by dimension value.
    pub fn values_by(&self, name: &str, dimension: &str) -> Vec<(String, f64)> {
        let mut values: Vec<(String, f64)> = self
            .rows(name, Granularity::FiveMinutes)
            .into_iter()
            .map(|m| {
                (
                    m.dimensions.get(dimension).unwrap_or_default().to_string(),
                    m.value,
                )
            })
            .collect();
        values.sort_by(|a, b| a.0.cmp(&b.0));
        values
    }
}

/// Three retries with no delay between attempts.
pub fn instant_retries() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        initial_delay_ms: 0,
        max_delay_ms: 0,
        backoff_multiplier: 1.0,
    }
}

/// A GitHub push delivery.
pub fn github_push(payload: &str, delivery_id: &str) -> RawEvent {
    RawEvent::new(payload, "github")
        .with_event_type("push")
        .with_delivery_id(delivery_id)
}
