//! Anomaly detection and alert notification for Pulse.
#![forbid(unsafe_code)]
//!
//! `pulse-alerts` checks aggregated metrics against threshold policies
//! chosen by metric-name pattern and delivers the resulting alerts.
//!
//! # Policies
//!
//! - **Static**: a fixed threshold, e.g. any metric whose name contains
//!   `cpu` alerts above 80.0
//! - **Statistical**: `mean + N * std_dev` over the series' trailing buckets
//!
//! A value strictly above its threshold raises a `warning`; at twice the
//! threshold or more it is `critical`.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use chrono::Utc;
//! use pulse_alerts::{AnomalyDetector, Dispatcher, LogChannel};
//! use pulse_core::{
//!     AlertSeverity, BucketKey, Dimensions, Granularity, Metric, MetricName, SeriesKey, Source,
//! };
//! use pulse_metrics::InMemoryStorage;
//!
//! let storage = Arc::new(InMemoryStorage::new());
//! let dispatcher = Arc::new(Dispatcher::new().with_channel(LogChannel::default()));
//! let detector = AnomalyDetector::new(storage, dispatcher);
//!
//! let series = SeriesKey::new(
//!     MetricName::new("host.cpu_usage").unwrap(),
//!     Dimensions::new().with("host", "web-1"),
//! );
//! let bucket = BucketKey::for_timestamp(series, Granularity::FiveMinutes, Utc::now());
//! let metric = Metric::new(&bucket, Source::parse("host"), 95.5);
//!
//! let alert = detector.detect(&metric).unwrap().unwrap();
//! assert_eq!(alert.severity, AlertSeverity::Warning);
//! ```

#![doc(html_root_url = "https://docs.rs/pulse-alerts/0.1.0")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod channels;
pub mod detector;
pub mod error;
pub mod policy;

// Re-export main types at crate root
pub use channels::{
    Dispatcher, LogChannel, MemoryChannel, NotificationChannel, WebhookChannel, WebhookConfig,
    WebhookPayload,
};
pub use detector::{AnomalyDetector, Finding, alert_name};
pub use error::{AlertError, Result};
pub use policy::{DetectionConfig, PolicyRule, PolicySet, ThresholdPolicy};
