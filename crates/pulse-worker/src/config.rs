//! Worker configuration.
//!
//! One TOML file configures the whole pipeline:
//! - Queue maxima used for backpressure
//! - Retry budget and backoff
//! - Batch size and idle backoff of the worker loop
//! - Aggregation granularities
//! - Detection policies
//! - Metric cache and notification channels
//!
//! Every section is optional; missing sections take their defaults.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use pulse_alerts::{DetectionConfig, PolicySet, WebhookConfig};
use pulse_metrics::{AggregationConfig, CacheConfig};
use pulse_queue::{QueueLimits, QueueName, RetryPolicy};

use crate::error::{Result, WorkerError};

/// Settings for the worker's batch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Jobs claimed per queue per round.
    pub batch_size: usize,
    /// Consecutive empty rounds before the worker backs off.
    pub max_empty_batches: u32,
    /// How long to sleep once `max_empty_batches` is reached, in milliseconds.
    pub idle_backoff_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_empty_batches: 3,
            idle_backoff_ms: 1_000,
        }
    }
}

impl BatchConfig {
    /// Returns the idle backoff as a duration.
    #[must_use]
    pub const fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }
}

/// Which notification channels to register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Whether alerts are written to the log.
    pub log: bool,
    /// Webhook receivers.
    pub webhooks: Vec<WebhookConfig>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            log: true,
            webhooks: Vec::new(),
        }
    }
}

/// Main worker configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    /// Maximum depth per queue.
    pub queue_limits: QueueLimits,
    /// Retry budget for failed jobs.
    pub retry: RetryPolicy,
    /// Batch loop settings.
    pub batch: BatchConfig,
    /// Aggregation settings.
    pub aggregation: AggregationConfig,
    /// Anomaly detection policies.
    pub detection: DetectionConfig,
    /// Metric cache settings.
    pub cache: CacheConfig,
    /// Notification channels.
    pub notifications: NotificationConfig,
}

impl PulseConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            WorkerError::Config(format!(
                "failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| WorkerError::Config(format!("invalid TOML: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::Config` for out-of-range values and
    /// `WorkerError::Alert` if the detection policies do not compile.
    pub fn validate(&self) -> Result<()> {
        for queue in QueueName::ALL {
            if self.queue_limits.max_for(queue) == 0 {
                return Err(WorkerError::Config(format!(
                    "queue limit for {queue} must be positive"
                )));
            }
        }

        if self.retry.backoff_multiplier < 1.0 || !self.retry.backoff_multiplier.is_finite() {
            return Err(WorkerError::Config(
                "retry.backoff_multiplier must be a finite number >= 1".to_string(),
            ));
        }

        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(WorkerError::Config(
                "retry.initial_delay_ms cannot exceed retry.max_delay_ms".to_string(),
            ));
        }

        if self.batch.batch_size == 0 {
            return Err(WorkerError::Config(
                "batch.batch_size must be positive".to_string(),
            ));
        }

        if self.batch.max_empty_batches == 0 {
            return Err(WorkerError::Config(
                "batch.max_empty_batches must be positive".to_string(),
            ));
        }

        if self.aggregation.granularities.is_empty() {
            return Err(WorkerError::Config(
                "aggregation.granularities cannot be empty".to_string(),
            ));
        }

        if !self
            .aggregation
            .granularities
            .contains(&self.aggregation.cached_granularity)
        {
            return Err(WorkerError::Config(format!(
                "aggregation.cached_granularity {} is not aggregated",
                self.aggregation.cached_granularity
            )));
        }

        if self.cache.max_entries == 0 {
            return Err(WorkerError::Config(
                "cache.max_entries must be positive".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for webhook in &self.notifications.webhooks {
            if webhook.url.trim().is_empty() {
                return Err(WorkerError::Config(format!(
                    "webhook '{}' has an empty url",
                    webhook.name
                )));
            }
            if !names.insert(webhook.name.as_str()) {
                return Err(WorkerError::Config(format!(
                    "duplicate webhook name '{}'",
                    webhook.name
                )));
            }
        }

        PolicySet::compile(&self.detection)?;
        Ok(())
    }
}
