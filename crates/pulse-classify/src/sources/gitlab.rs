//! GitLab webhooks.

use pulse_core::{Dimensions, Event, MetricObservation, SourceKind, UNKNOWN};

use super::{
    SourceHandler, base_dimensions, build_observations, is_failure, is_push, merge_observations,
    push_observations,
};
use crate::dimensions::{extract_org_from_repo, parse_ref};
use crate::payload;

/// Pipeline statuses that mean the run has finished.
const FINISHED_PIPELINE: [&str; 4] = ["success", "failed", "canceled", "skipped"];

/// Handler for `gitlab` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitLabHandler;

impl GitLabHandler {
    fn author(event: &Event) -> Option<&str> {
        payload::first_str(
            event.data(),
            &[&["user_username"], &["user", "username"], &["user_name"], &["user", "name"]],
        )
    }

    fn branch(event: &Event, event_type: &str) -> String {
        let data = event.data();
        let raw = match event_type {
            "merge_request" => payload::str_at(data, &["object_attributes", "source_branch"]),
            "pipeline" => payload::str_at(data, &["object_attributes", "ref"]),
            _ => payload::str_at(data, &["ref"]),
        };
        raw.map(|r| parse_ref(r).unwrap_or(r))
            .filter(|r| !r.starts_with("refs/"))
            .unwrap_or(UNKNOWN)
            .to_string()
    }
}

impl SourceHandler for GitLabHandler {
    fn kind(&self) -> SourceKind {
        SourceKind::GitLab
    }

    fn dimensions(&self, event: &Event) -> Dimensions {
        let data = event.data();
        let event_type = event.event_type();
        let repository = payload::str_at(data, &["project", "path_with_namespace"]);

        let mut dims = base_dimensions(event);
        dims.insert_or_unknown("repository", repository);
        dims.insert("organization", extract_org_from_repo(repository));
        dims.insert_or_unknown("author", Self::author(event));
        dims.insert("branch", Self::branch(event, &event_type));

        match event_type.as_str() {
            "merge_request" => {
                dims.insert_or_unknown(
                    "action",
                    payload::str_at(data, &["object_attributes", "action"]),
                );
                dims.insert_or_unknown(
                    "target_branch",
                    payload::str_at(data, &["object_attributes", "target_branch"]),
                );
            }
            "pipeline" => {
                dims.insert_or_unknown(
                    "status",
                    payload::str_at(data, &["object_attributes", "status"]),
                );
            }
            _ => {}
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
            "merge_request" => {
                let action = payload::str_at(data, &["object_attributes", "action"]);
                let state = payload::str_at(data, &["object_attributes", "state"]);
                if action != Some("merge") && state != Some("merged") {
                    return Vec::new();
                }
                let lead_time = payload::seconds_between(
                    data,
                    &["object_attributes", "created_at"],
                    &["object_attributes", "updated_at"],
                );
                merge_observations(source, lead_time, dimensions)
            }
            "pipeline" => {
                let Some(status) = payload::str_at(data, &["object_attributes", "status"]) else {
                    return Vec::new();
                };
                if !FINISHED_PIPELINE.contains(&status) {
                    return Vec::new();
                }
                let duration = payload::f64_at(data, &["object_attributes", "duration"]);
                build_observations(source, is_failure(status), duration, dimensions)
            }
            _ => Vec::new(),
        }
    }
}
