//! Queue-driven worker for the Pulse metrics pipeline.
#![forbid(unsafe_code)]
//!
//! `pulse-worker` wires the pipeline together by constructor injection and
//! drives jobs through it:
//!
//! 1. `raw_events`: parse the payload and store the event
//! 2. `event_processing`: schedule metric calculation
//! 3. `metric_calculation`: classify and aggregate
//! 4. `anomaly_detection`: evaluate, persist alerts, notify
//!
//! Failed jobs are retried with exponential backoff and dead-lettered once
//! the retry budget is spent. Malformed payloads are dead-lettered at once.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use pulse_core::RawEvent;
//! use pulse_metrics::InMemoryStorage;
//! use pulse_queue::InMemoryQueue;
//! use pulse_worker::{PulseConfig, Worker};
//!
//! let storage = Arc::new(InMemoryStorage::new());
//! let worker = Worker::from_config(
//!     &PulseConfig::default(),
//!     Arc::new(InMemoryQueue::new()),
//!     storage.clone(),
//! )
//! .unwrap();
//!
//! worker
//!     .pipeline()
//!     .ingest(RawEvent::new(r#"{"event_type": "deploy"}"#, "custom_source"))
//!     .unwrap();
//! let report = worker.run_once().unwrap();
//! assert_eq!(report.dead_lettered, 0);
//! assert_eq!(storage.event_count(), 1);
//! ```

#![doc(html_root_url = "https://docs.rs/pulse-worker/0.1.0")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod error;
pub mod pipeline;
pub mod runner;

// Re-export main types at crate root
pub use config::{BatchConfig, NotificationConfig, PulseConfig};
pub use error::{Result, WorkerError};
pub use pipeline::{Pipeline, StageOutcome, build_dispatcher};
pub use runner::{RoundReport, Worker};
