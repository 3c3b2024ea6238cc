//! Domain model shared by every stage of the Pulse metrics pipeline.
#![forbid(unsafe_code)]
//!
//! `pulse-core` defines the entities that flow from webhook ingestion to
//! alerting, plus the collaborator traits the pipeline talks through.
//!
//! # Entities
//!
//! - [`Event`]: an immutable ingested occurrence from a source system
//! - [`MetricObservation`]: one data point produced by classification
//! - [`Metric`]: a persisted aggregate for one series in one time bucket
//! - [`Alert`]: raised when a metric crosses its threshold
//!
//! # Ports
//!
//! - [`Storage`]: events, metrics and alerts persistence
//! - [`MetricCache`]: advisory cache of current metric values
//! - [`Notifier`]: outbound alert delivery
//!
//! # Example
//!
//! ```rust
//! use pulse_core::{Event, Source};
//! use serde_json::Map;
//!
//! let event = Event::new("github.push", "github", Map::new()).unwrap();
//! assert_eq!(event.source(), &Source::GitHub);
//! assert_eq!(event.event_type(), "push");
//! ```

#![doc(html_root_url = "https://docs.rs/pulse-core/0.1.0")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod alert;
pub mod error;
pub mod event;
pub mod metric;
pub mod ports;

// Re-export main types at crate root
pub use alert::{Alert, AlertId, AlertSeverity, AlertStatus};
pub use error::{
    EventError, EventResult, NotificationError, NotificationResult, RepositoryError,
    RepositoryErrorKind, RepositoryResult,
};
pub use event::{Event, EventId, EventMetadata, RawEvent, Source, SourceKind};
pub use metric::{
    BucketKey, Dimensions, Granularity, IncrementOutcome, Metric, MetricId, MetricIncrement,
    MetricName, MetricObservation, SeriesKey, UNKNOWN,
};
pub use ports::{MetricCache, Notifier, Storage};
