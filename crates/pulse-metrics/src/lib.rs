//! Time-bucketed metric aggregation for Pulse.
#![forbid(unsafe_code)]
//!
//! This crate rolls [`MetricObservation`]s into per-bucket aggregates and
//! provides in-memory implementations of the [`Storage`] and
//! [`MetricCache`] ports.
//!
//! # Aggregation
//!
//! Each observation is keyed by `(name, dimensions, bucket_start)` at every
//! configured [`Granularity`]. Increments carry a dedup key derived from the
//! event id, the metric name and the dimensions, so replays never double
//! count and application order never matters.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use chrono::Utc;
//! use pulse_core::{Dimensions, EventId, MetricName, MetricObservation, Source};
//! use pulse_metrics::{Aggregator, InMemoryStorage, ObservationRecord};
//!
//! let storage = Arc::new(InMemoryStorage::new());
//! let aggregator = Aggregator::new(storage.clone());
//!
//! let record = ObservationRecord::new(
//!     EventId::new("delivery-1"),
//!     Source::GitHub,
//!     Utc::now(),
//!     MetricObservation::new(
//!         MetricName::new("github.push_count").unwrap(),
//!         1.0,
//!         Dimensions::new().with("repository", "octocat/hello-world"),
//!     ),
//! );
//!
//! let first = aggregator.aggregate_all(&[record.clone()]).unwrap();
//! let replay = aggregator.aggregate_all(&[record]).unwrap();
//! assert_eq!(first.applied, 3);
//! assert_eq!(replay.applied, 0);
//! ```
//!
//! [`MetricObservation`]: pulse_core::MetricObservation
//! [`Storage`]: pulse_core::Storage
//! [`MetricCache`]: pulse_core::MetricCache
//! [`Granularity`]: pulse_core::Granularity

#![doc(html_root_url = "https://docs.rs/pulse-metrics/0.1.0")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod aggregator;
pub mod cache;
pub mod query;
pub mod storage;

// Re-export main types at crate root
pub use aggregator::{
    AggregationBuffer, AggregationConfig, AggregationReport, Aggregator, ObservationRecord,
    dedup_key,
};
pub use cache::{CacheConfig, InMemoryMetricCache};
pub use query::{MetricReader, TrailingStats, trailing_stats};
pub use storage::InMemoryStorage;
