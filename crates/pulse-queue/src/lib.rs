//! Queue admission, job lifecycle and retry policy for Pulse.
#![forbid(unsafe_code)]
//!
//! Work moves between four logical queues: `raw_events`,
//! `event_processing`, `metric_calculation` and `anomaly_detection`. The
//! [`AdmissionController`] refuses new raw events while any of them is at
//! its configured maximum depth, so ingestion can push back on callers
//! instead of buffering without bound.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use pulse_core::RawEvent;
//! use pulse_queue::{AdmissionController, InMemoryQueue, QueueLimits, QueueName};
//!
//! let backend = Arc::new(InMemoryQueue::new());
//! let limits = QueueLimits::default().with_max(QueueName::RawEvents, 1);
//! let controller = AdmissionController::new(backend).with_limits(limits);
//!
//! controller.enqueue_raw_event(RawEvent::new("{}", "github")).unwrap();
//! let err = controller.enqueue_raw_event(RawEvent::new("{}", "github")).unwrap_err();
//! assert!(err.is_backpressure());
//! ```

#![doc(html_root_url = "https://docs.rs/pulse-queue/0.1.0")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod admission;
pub mod backend;
pub mod error;
pub mod job;
pub mod queue;
pub mod retry;

// Re-export main types at crate root
pub use admission::AdmissionController;
pub use backend::{InMemoryQueue, QueueBackend, all_depths};
pub use error::{QueueError, Result};
pub use job::{Job, JobId, JobPayload, JobState};
pub use queue::{QueueLimits, QueueName};
pub use retry::RetryPolicy;
