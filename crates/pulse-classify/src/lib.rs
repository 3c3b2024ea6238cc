//! Webhook payload parsing, dimension extraction and event classification.
#![forbid(unsafe_code)]
//!
//! `pulse-classify` turns untrusted provider payloads into [`Event`]s and
//! events into dimensioned [`MetricObservation`]s. Everything here is pure:
//! no I/O, no shared state, and no failure on partial payloads.
//!
//! # Supported sources
//!
//! GitHub, GitLab, Jira, Bitbucket, generic CI and task trackers each have a
//! [`SourceHandler`]. Any other source falls back to [`GenericHandler`],
//! which emits the count metric with `{source}` as its only dimension.
//!
//! # Example
//!
//! ```rust
//! use pulse_classify::{EventClassifier, parse_raw_event};
//! use pulse_core::RawEvent;
//!
//! let raw = RawEvent::new(
//!     r#"{"ref": "refs/heads/main", "commits": [{"added": ["app/models/x.rb"]}]}"#,
//!     "github",
//! );
//! let event = parse_raw_event(&raw).unwrap();
//! assert_eq!(event.name(), "github.push");
//!
//! let classification = EventClassifier::new().classify(&event);
//! assert_eq!(classification.metrics[0].name.as_str(), "github.push_count");
//! ```
//!
//! [`Event`]: pulse_core::Event
//! [`MetricObservation`]: pulse_core::MetricObservation

#![doc(html_root_url = "https://docs.rs/pulse-classify/0.1.0")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod classifier;
pub mod dimensions;
pub mod event_type;
pub mod ingest;
pub mod payload;
pub mod sources;

// Re-export main types at crate root
pub use classifier::{Classification, EventClassifier};
pub use dimensions::{
    ChangeKind, FileChange, NO_FILETYPE, ROOT_DIRECTORY, extract_author, extract_branch,
    extract_commit_count, extract_dimensions, extract_file_changes, extract_org_from_repo,
    split_path,
};
pub use event_type::{infer_event_type, normalize_event_type};
pub use ingest::{UNKNOWN_EVENT_TYPE, parse_raw_event};
pub use sources::{
    BitbucketHandler, CiHandler, GenericHandler, GitHubHandler, GitLabHandler, HandlerRegistry,
    JiraHandler, SourceHandler, TaskHandler, builtin_handler,
};
