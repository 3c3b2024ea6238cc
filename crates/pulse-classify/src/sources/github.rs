//! GitHub webhooks.

use pulse_core::{Dimensions, Event, MetricObservation, SourceKind};
use serde_json::{Map, Value};

use super::{
    SourceHandler, base_dimensions, build_observations, is_failure, is_push, line_observations,
    merge_observations, observation, push_observations,
};
use crate::dimensions::{extract_author, extract_branch, extract_org_from_repo, parse_ref};
use crate::payload;

/// CI event types; each names the payload object carrying the run.
const CI_EVENTS: [&str; 4] = ["check_run", "check_suite", "workflow_run", "workflow_job"];

/// Handler for `github` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitHubHandler;

impl GitHubHandler {
    fn branch(event: &Event, event_type: &str) -> String {
        let data = event.data();
        let from_ref = extract_branch(event);
        if from_ref != pulse_core::UNKNOWN {
            return from_ref;
        }
        let fallback = match event_type {
            "pull_request" => payload::str_at(data, &["pull_request", "head", "ref"]),
            t if CI_EVENTS.contains(&t) => payload::str_at(data, &[t, "head_branch"]),
            "deployment" | "deployment_status" => payload::str_at(data, &["deployment", "ref"])
                .map(|r| parse_ref(r).unwrap_or(r)),
            _ => None,
        };
        fallback.unwrap_or(pulse_core::UNKNOWN).to_string()
    }

    fn ci_run<'a>(data: &'a Map<String, Value>, event_type: &str) -> Option<&'a Map<String, Value>> {
        CI_EVENTS
            .contains(&event_type)
            .then(|| payload::object_at(data, &[event_type]))
            .flatten()
    }

    fn workflow_name(run: &Map<String, Value>, event_type: &str) -> Option<String> {
        let paths: &[&[&str]] = match event_type {
            "workflow_job" => &[&["workflow_name"], &["name"]],
            "check_suite" => &[&["app", "name"]],
            _ => &[&["name"]],
        };
        payload::first_str(run, paths).map(str::to_string)
    }

    fn run_duration(run: &Map<String, Value>, event_type: &str) -> Option<f64> {
        match event_type {
            "workflow_run" => payload::seconds_between(run, &["run_started_at"], &["updated_at"]),
            "check_suite" => payload::seconds_between(run, &["created_at"], &["updated_at"]),
            _ => payload::seconds_between(run, &["started_at"], &["completed_at"]),
        }
    }
}

impl SourceHandler for GitHubHandler {
    fn kind(&self) -> SourceKind {
        SourceKind::GitHub
    }

    fn dimensions(&self, event: &Event) -> Dimensions {
        let data = event.data();
        let event_type = event.event_type();
        let repository = payload::str_at(data, &["repository", "full_name"]);

        let mut dims = base_dimensions(event);
        dims.insert_or_unknown("repository", repository);
        dims.insert("organization", extract_org_from_repo(repository));
        dims.insert("branch", Self::branch(event, &event_type));
        dims.insert("author", extract_author(event));

        match event_type.as_str() {
            "pull_request" => {
                dims.insert_or_unknown("action", payload::str_at(data, &["action"]));
                dims.insert_or_unknown(
                    "base_branch",
                    payload::str_at(data, &["pull_request", "base", "ref"]),
                );
                dims.insert_or_unknown(
                    "merged",
                    payload::scalar_at(data, &["pull_request", "merged"]).as_deref(),
                );
            }
            "issues" | "issue_comment" => {
                dims.insert_or_unknown("action", payload::str_at(data, &["action"]));
            }
            "deployment" | "deployment_status" => {
                dims.insert_or_unknown(
                    "environment",
                    payload::str_at(data, &["deployment", "environment"]),
                );
                dims.insert_or_unknown(
                    "state",
                    payload::str_at(data, &["deployment_status", "state"]),
                );
            }
            t => {
                if let Some(run) = Self::ci_run(data, t) {
                    dims.insert_or_unknown("workflow", Self::workflow_name(run, t).as_deref());
                    dims.insert_or_unknown("status", payload::str_at(run, &["status"]));
                    dims.insert_or_unknown("conclusion", payload::str_at(run, &["conclusion"]));
                } else if CI_EVENTS.contains(&t) {
                    for key in ["workflow", "status", "conclusion"] {
                        dims.insert_or_unknown(key, None);
                    }
                }
            }
        }

        dims
    }

    fn observations(&self, event: &Event, dimensions: &Dimensions) -> Vec<MetricObservation> {
        let data = event.data();
        let source = event.source();
        let event_type = event.event_type();

        if is_push(&event_type) {
            return push_observations(event, dimensions);
        }

        match event_type.as_str() {
            "pull_request" => {
                if payload::bool_at(data, &["pull_request", "merged"]) != Some(true) {
                    return Vec::new();
                }
                let lead_time = payload::seconds_between(
                    data,
                    &["pull_request", "created_at"],
                    &["pull_request", "merged_at"],
                );
                let mut out = merge_observations(source, lead_time, dimensions);
                let added = payload::f64_at(data, &["pull_request", "additions"]);
                let deleted = payload::f64_at(data, &["pull_request", "deletions"]);
                if added.is_some() || deleted.is_some() {
                    out.extend(line_observations(
                        source,
                        added.unwrap_or(0.0),
                        deleted.unwrap_or(0.0),
                        dimensions,
                    ));
                }
                out
            }
            "deployment_status" => {
                let mut out = vec![observation(source, "deployment_count", 1.0, dimensions.clone())];
                if payload::str_at(data, &["deployment_status", "state"]).is_some_and(is_failure) {
                    out.push(observation(
                        source,
                        "deployment_failure_count",
                        1.0,
                        dimensions.clone(),
                    ));
                }
                out
            }
            t => match Self::ci_run(data, t) {
                Some(run) if payload::str_at(run, &["status"]) == Some("completed") => {
                    let failed = payload::str_at(run, &["conclusion"]).is_some_and(is_failure);
                    build_observations(source, failed, Self::run_duration(run, t), dimensions)
                }
                _ => Vec::new(),
            },
        }
    }
}
