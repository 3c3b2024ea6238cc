//! Notification channels for alert delivery.
//!
//! This module provides the [`NotificationChannel`] trait, a few channel
//! implementations, and the [`Dispatcher`] that fans an alert out to every
//! enabled channel and implements the [`Notifier`] port.

use std::collections::BTreeMap;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use pulse_core::{Alert, NotificationError, NotificationResult, Notifier};

/// Trait for notification channels.
///
/// Implement this trait to deliver alerts through a new transport.
pub trait NotificationChannel: Send + Sync + fmt::Debug {
    /// Returns the name of this channel.
    fn name(&self) -> &str;

    /// Delivers an alert.
    ///
    /// # Errors
    ///
    /// Returns `NotificationError::DeliveryFailed` if the alert cannot be sent.
    fn send(&self, alert: &Alert) -> NotificationResult<()>;

    /// Delivers free text.
    ///
    /// # Errors
    ///
    /// Returns `NotificationError::DeliveryFailed` if the text cannot be sent.
    fn send_text(&self, text: &str) -> NotificationResult<()>;

    /// Returns true if this channel is enabled.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// A channel that writes alerts to the tracing log.
#[derive(Debug, Clone)]
pub struct LogChannel {
    name: String,
    enabled: bool,
}

impl LogChannel {
    /// Creates a new log channel.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
        }
    }

    /// Sets whether the channel is enabled.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl Default for LogChannel {
    fn default() -> Self {
        Self::new("log")
    }
}

impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, alert: &Alert) -> NotificationResult<()> {
        error!(
            alert = %alert.name,
            alert_id = %alert.id,
            severity = %alert.severity,
            metric = %alert.metric.name,
            value = alert.metric.value,
            threshold = alert.threshold,
            dimensions = ?alert.metric.dimensions,
            "ALERT"
        );
        Ok(())
    }

    fn send_text(&self, text: &str) -> NotificationResult<()> {
        info!(channel = %self.name, message = %text, "notification");
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Configuration for a webhook channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// The name of this webhook.
    pub name: String,
    /// The URL to send notifications to.
    pub url: String,
    /// HTTP headers to include with requests.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Timeout in seconds for HTTP requests.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Whether this channel is enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_enabled() -> bool {
    true
}

impl WebhookConfig {
    /// Creates a new webhook configuration.
    ///
    /// # Errors
    ///
    /// Returns `NotificationError::DeliveryFailed` if the URL is empty.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> NotificationResult<Self> {
        let name = name.into();
        let url = url.into();
        if url.trim().is_empty() {
            return Err(NotificationError::DeliveryFailed {
                channel: name,
                reason: "webhook URL cannot be empty".to_string(),
            });
        }

        Ok(Self {
            name,
            url,
            headers: BTreeMap::new(),
            timeout_secs: default_timeout_secs(),
            enabled: true,
        })
    }

    /// Adds a header to the configuration.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Sets whether the channel is enabled.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// The JSON body posted for an alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    /// Payload format version.
    pub version: String,
    /// The receiving channel.
    pub receiver: String,
    /// Alert id.
    pub alert_id: String,
    /// Alert name.
    pub name: String,
    /// `info`, `warning` or `critical`.
    pub severity: String,
    /// Alert lifecycle status.
    pub status: String,
    /// The offending metric.
    pub metric: String,
    /// The metric's value.
    pub value: f64,
    /// The threshold it exceeded.
    pub threshold: f64,
    /// The metric's dimensions.
    pub dimensions: BTreeMap<String, String>,
    /// When the alert was raised, RFC 3339.
    pub raised_at: String,
    /// Start of the metric's bucket, RFC 3339.
    pub bucket_start: String,
}

impl WebhookPayload {
    /// Creates a payload from an alert.
    #[must_use]
    pub fn from_alert(receiver: &str, alert: &Alert) -> Self {
        Self {
            version: "1".to_string(),
            receiver: receiver.to_string(),
            alert_id: alert.id.to_string(),
            name: alert.name.clone(),
            severity: alert.severity.to_string(),
            status: alert.status.to_string(),
            metric: alert.metric.name.to_string(),
            value: alert.metric.value,
            threshold: alert.threshold,
            dimensions: alert
                .metric
                .dimensions
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            raised_at: alert.timestamp.to_rfc3339(),
            bucket_start: alert.metric.recorded_at.to_rfc3339(),
        }
    }
}

/// A webhook notification channel.
///
/// Formats alerts as JSON for a configured URL. Transport is left to the
/// deployment; this channel logs the request it would make.
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    config: WebhookConfig,
}

impl WebhookChannel {
    /// Creates a new webhook channel with the given configuration.
    #[must_use]
    pub const fn new(config: WebhookConfig) -> Self {
        Self { config }
    }

    /// Returns the webhook URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Formats an alert as JSON.
    ///
    /// # Errors
    ///
    /// Returns `NotificationError::DeliveryFailed` if serialization fails.
    pub fn format_payload(&self, alert: &Alert) -> NotificationResult<String> {
        let payload = WebhookPayload::from_alert(&self.config.name, alert);
        serde_json::to_string(&payload).map_err(|e| NotificationError::DeliveryFailed {
            channel: self.config.name.clone(),
            reason: e.to_string(),
        })
    }
}

impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn send(&self, alert: &Alert) -> NotificationResult<()> {
        let payload = self.format_payload(alert)?;
        info!(
            channel = %self.name(),
            url = %self.config.url,
            alert_id = %alert.id,
            severity = %alert.severity,
            "would send webhook notification"
        );
        debug!(payload = %payload, "webhook payload");
        Ok(())
    }

    fn send_text(&self, text: &str) -> NotificationResult<()> {
        let body = serde_json::json!({ "receiver": self.config.name, "text": text });
        info!(
            channel = %self.name(),
            url = %self.config.url,
            "would send webhook message"
        );
        debug!(payload = %body, "webhook payload");
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

/// A channel that keeps everything it receives in memory.
///
/// Useful for local runs and tests.
#[derive(Debug, Default)]
pub struct MemoryChannel {
    name: String,
    alerts: RwLock<Vec<Alert>>,
    messages: RwLock<Vec<String>>,
}

impl MemoryChannel {
    /// Creates an empty channel.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Returns the alerts received so far.
    #[must_use]
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.read().clone()
    }

    /// Returns the messages received so far.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.messages.read().clone()
    }
}

impl NotificationChannel for MemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, alert: &Alert) -> NotificationResult<()> {
        self.alerts.write().push(alert.clone());
        Ok(())
    }

    fn send_text(&self, text: &str) -> NotificationResult<()> {
        self.messages.write().push(text.to_string());
        Ok(())
    }
}

impl<T: NotificationChannel + ?Sized> NotificationChannel for std::sync::Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn send(&self, alert: &Alert) -> NotificationResult<()> {
        (**self).send(alert)
    }

    fn send_text(&self, text: &str) -> NotificationResult<()> {
        (**self).send_text(text)
    }

    fn is_enabled(&self) -> bool {
        (**self).is_enabled()
    }
}

/// Fans alerts out to registered channels.
///
/// Every enabled channel is attempted; a failure in one does not stop the
/// others. The dispatch fails if any channel failed.
#[derive(Debug, Default)]
pub struct Dispatcher {
    channels: RwLock<Vec<Box<dyn NotificationChannel>>>,
}

impl Dispatcher {
    /// Creates a dispatcher with no channels.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a channel.
    pub fn add_channel(&self, channel: Box<dyn NotificationChannel>) {
        info!(channel = %channel.name(), "registered notification channel");
        self.channels.write().push(channel);
    }

    /// Registers a channel, builder style.
    #[must_use]
    pub fn with_channel(self, channel: impl NotificationChannel + 'static) -> Self {
        self.add_channel(Box::new(channel));
        self
    }

    /// Returns the number of registered channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }
}

impl Notifier for Dispatcher {
    fn send_alert(&self, alert: &Alert) -> NotificationResult<()> {
        let channels = self.channels.read();
        let mut failures = Vec::new();

        for channel in channels.iter().filter(|c| c.is_enabled()) {
            if let Err(err) = channel.send(alert) {
                warn!(
                    channel = %channel.name(),
                    alert_id = %alert.id,
                    error = %err,
                    "alert delivery failed"
                );
                failures.push(channel.name().to_string());
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(NotificationError::DeliveryFailed {
                channel: failures.join(","),
                reason: format!("{} of {} channels failed", failures.len(), channels.len()),
            })
        }
    }

    fn send_message(&self, channel: &str, text: &str) -> NotificationResult<()> {
        let channels = self.channels.read();
        let target = channels
            .iter()
            .find(|c| c.name() == channel)
            .ok_or_else(|| NotificationError::UnknownChannel {
                channel: channel.to_string(),
            })?;

        if !target.is_enabled() {
            debug!(channel = %channel, "channel is disabled, skipping");
            return Ok(());
        }
        target.send_text(text)
    }
}
