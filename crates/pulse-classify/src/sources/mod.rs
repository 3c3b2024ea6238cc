//! Per-source dimension and metric handlers.
//!
//! Each supported [`SourceKind`] has one [`SourceHandler`]. The
//! [`HandlerRegistry`] maps kinds to handlers and is built from
//! [`SourceKind::ALL`] through [`builtin_handler`], whose exhaustive match
//! keeps the supported set checked at compile time.

mod bitbucket;
mod ci;
mod generic;
mod github;
mod gitlab;
mod jira;
mod task;

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use pulse_core::{Dimensions, Event, MetricName, MetricObservation, Source, SourceKind};

use crate::dimensions::{ChangeKind, extract_commit_count, extract_file_changes};
use crate::payload;

pub use bitbucket::BitbucketHandler;
pub use ci::CiHandler;
pub use generic::GenericHandler;
pub use github::GitHubHandler;
pub use gitlab::GitLabHandler;
pub use jira::JiraHandler;
pub use task::TaskHandler;

/// Extracts dimensions and source-specific metrics for one source.
///
/// Implementations must be total over partial payloads.
pub trait SourceHandler: Send + Sync + fmt::Debug {
    /// The source kind this handler serves.
    fn kind(&self) -> SourceKind;

    /// Returns the dimension set for an event.
    fn dimensions(&self, event: &Event) -> Dimensions;

    /// Returns metrics beyond the overall count metric.
    ///
    /// `dimensions` is the output of [`SourceHandler::dimensions`] for the
    /// same event.
    fn observations(&self, event: &Event, dimensions: &Dimensions) -> Vec<MetricObservation>;
}

/// Returns the built-in handler for a kind.
#[must_use]
pub fn builtin_handler(kind: SourceKind) -> Box<dyn SourceHandler> {
    match kind {
        SourceKind::GitHub => Box::new(GitHubHandler),
        SourceKind::GitLab => Box::new(GitLabHandler),
        SourceKind::Jira => Box::new(JiraHandler),
        SourceKind::Bitbucket => Box::new(BitbucketHandler),
        SourceKind::Ci => Box::new(CiHandler),
        SourceKind::Task => Box::new(TaskHandler),
        SourceKind::Unknown => Box::new(GenericHandler),
    }
}

/// Lookup table from source kind to handler.
#[derive(Debug)]
pub struct HandlerRegistry {
    handlers: BTreeMap<SourceKind, Box<dyn SourceHandler>>,
    fallback: GenericHandler,
}

impl HandlerRegistry {
    /// Creates a registry holding every built-in handler.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: SourceKind::ALL
                .into_iter()
                .map(|kind| (kind, builtin_handler(kind)))
                .collect(),
            fallback: GenericHandler,
        }
    }

    /// Replaces the handler for `handler.kind()`.
    #[must_use]
    pub fn with_handler(mut self, handler: Box<dyn SourceHandler>) -> Self {
        self.handlers.insert(handler.kind(), handler);
        self
    }

    /// Returns the handler for a kind.
    #[must_use]
    pub fn get(&self, kind: SourceKind) -> &dyn SourceHandler {
        self.handlers
            .get(&kind)
            .map_or(&self.fallback as &dyn SourceHandler, |handler| handler.as_ref())
    }

    /// Returns the handler for an event's source.
    #[must_use]
    pub fn for_event(&self, event: &Event) -> &dyn SourceHandler {
        self.get(event.source().kind())
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Starts a dimension set with `source` and `event_type`.
pub(crate) fn base_dimensions(event: &Event) -> Dimensions {
    Dimensions::new()
        .with("source", event.source().as_str())
        .with("event_type", event.event_type())
}

/// Builds an observation named `<source>.<suffix>`.
pub(crate) fn observation(
    source: &Source,
    suffix: &str,
    value: f64,
    dimensions: Dimensions,
) -> MetricObservation {
    let name = MetricName::sanitized(&format!("{}.{suffix}", source.as_str()));
    MetricObservation::new(name, value, dimensions)
}

/// Returns true if the event type names a push.
pub(crate) fn is_push(event_type: &str) -> bool {
    matches!(event_type, "push" | "tag_push")
}

/// Commit, file and line metrics for push-shaped payloads (a `commits`
/// array whose entries may list `added`, `modified` and `removed` paths
/// and carry `stats`).
pub(crate) fn push_observations(event: &Event, dimensions: &Dimensions) -> Vec<MetricObservation> {
    let source = event.source();
    let mut out = vec![observation(
        source,
        "commits_count",
        extract_commit_count(event) as f64,
        dimensions.clone(),
    )];

    let changes = extract_file_changes(event);
    if !changes.is_empty() {
        let mut directories: BTreeMap<&str, u64> = BTreeMap::new();
        let mut filetypes: BTreeMap<&str, u64> = BTreeMap::new();
        let mut kinds: HashMap<ChangeKind, u64> = HashMap::new();
        for change in &changes {
            *directories.entry(change.directory.as_str()).or_default() += 1;
            *filetypes.entry(change.filetype.as_str()).or_default() += 1;
            *kinds.entry(change.kind).or_default() += 1;
        }

        for (directory, touches) in directories {
            out.push(observation(
                source,
                "directory_changes",
                touches as f64,
                dimensions.clone().with("directory", directory),
            ));
        }
        for (filetype, touches) in filetypes {
            out.push(observation(
                source,
                "filetype_changes",
                touches as f64,
                dimensions.clone().with("filetype", filetype),
            ));
        }
        for (kind, field) in ChangeKind::FIELDS {
            let count = kinds.get(&kind).copied().unwrap_or(0);
            out.push(observation(
                source,
                &format!("files_{field}"),
                count as f64,
                dimensions.clone(),
            ));
        }
    }

    if let Some(commits) = payload::array_at(event.data(), &["commits"]) {
        let stats: Vec<_> = commits
            .iter()
            .filter_map(|commit| commit.as_object())
            .filter_map(|commit| payload::object_at(commit, &["stats"]))
            .collect();
        if !stats.is_empty() {
            let added: f64 = stats.iter().filter_map(|s| payload::f64_at(s, &["additions"])).sum();
            let deleted: f64 = stats.iter().filter_map(|s| payload::f64_at(s, &["deletions"])).sum();
            out.extend(line_observations(source, added, deleted, dimensions));
        }
    }

    out
}

/// `lines_added` and `lines_deleted` observations.
pub(crate) fn line_observations(
    source: &Source,
    added: f64,
    deleted: f64,
    dimensions: &Dimensions,
) -> [MetricObservation; 2] {
    [
        observation(source, "lines_added", added, dimensions.clone()),
        observation(source, "lines_deleted", deleted, dimensions.clone()),
    ]
}

/// Merge count and lead time for a merged pull or merge request.
pub(crate) fn merge_observations(
    source: &Source,
    lead_time_seconds: Option<f64>,
    dimensions: &Dimensions,
) -> Vec<MetricObservation> {
    let mut out = vec![observation(source, "pr_merged_count", 1.0, dimensions.clone())];
    if let Some(seconds) = lead_time_seconds {
        out.push(observation(
            source,
            "pr_lead_time_seconds",
            seconds,
            dimensions.clone(),
        ));
    }
    out
}

/// Build count, failure count and duration for a finished CI run.
pub(crate) fn build_observations(
    source: &Source,
    failed: bool,
    duration_seconds: Option<f64>,
    dimensions: &Dimensions,
) -> Vec<MetricObservation> {
    let mut out = vec![observation(source, "build_count", 1.0, dimensions.clone())];
    if failed {
        out.push(observation(source, "build_failure_count", 1.0, dimensions.clone()));
    }
    if let Some(seconds) = duration_seconds {
        out.push(observation(
            source,
            "build_duration_seconds",
            seconds,
            dimensions.clone(),
        ));
    }
    out
}

/// Returns true for CI outcomes that count as failures.
pub(crate) fn is_failure(outcome: &str) -> bool {
    matches!(
        outcome.to_ascii_lowercase().as_str(),
        "failure" | "failed" | "error" | "errored" | "timed_out" | "startup_failure"
    )
}
