//! Bitbucket Cloud webhooks.

use pulse_core::{Dimensions, Event, MetricObservation, SourceKind};
use serde_json::Value;

use super::{SourceHandler, base_dimensions, is_push, merge_observations, observation};
use crate::dimensions::extract_org_from_repo;
use crate::payload;

/// Handler for `bitbucket` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct BitbucketHandler;

impl BitbucketHandler {
    fn changes(event: &Event) -> impl Iterator<Item = &serde_json::Map<String, Value>> {
        payload::array_at(event.data(), &["push", "changes"])
            .into_iter()
            .flatten()
            .filter_map(Value::as_object)
    }

    fn commit_count(event: &Event) -> u64 {
        let total: usize = Self::changes(event)
            .filter_map(|change| payload::array_at(change, &["commits"]))
            .map(Vec::len)
            .sum();
        (total as u64).max(1)
    }
}

impl SourceHandler for BitbucketHandler {
    fn kind(&self) -> SourceKind {
        SourceKind::Bitbucket
    }

    fn dimensions(&self, event: &Event) -> Dimensions {
        let data = event.data();
        let event_type = event.event_type();
        let repository = payload::str_at(data, &["repository", "full_name"]);

        let mut dims = base_dimensions(event);
        dims.insert_or_unknown("repository", repository);
        match payload::first_str(
            data,
            &[&["repository", "workspace", "slug"], &["workspace", "slug"]],
        ) {
            Some(workspace) => dims.insert("organization", workspace),
            None => dims.insert("organization", extract_org_from_repo(repository)),
        }
        dims.insert_or_unknown(
            "author",
            payload::first_str(
                data,
                &[
                    &["actor", "display_name"],
                    &["actor", "nickname"],
                    &["actor", "username"],
                ],
            ),
        );

        if event_type == "pull_request" {
            dims.insert_or_unknown(
                "branch",
                payload::str_at(data, &["pullrequest", "source", "branch", "name"]),
            );
            dims.insert_or_unknown(
                "state",
                payload::str_at(data, &["pullrequest", "state"])
                    .map(str::to_ascii_lowercase)
                    .as_deref(),
            );
            dims.insert_or_unknown(
                "target_branch",
                payload::str_at(data, &["pullrequest", "destination", "branch", "name"]),
            );
        } else {
            let branch = Self::changes(event)
                .find_map(|change| payload::str_at(change, &["new", "name"]));
            dims.insert_or_unknown("branch", branch);
        }

        dims
    }

    fn observations(&self, event: &Event, dimensions: &Dimensions) -> Vec<MetricObservation> {
        let data = event.data();
        let source = event.source();
        let event_type = event.event_type();

        if is_push(&event_type) {
            return vec![observation(
                source,
                "commits_count",
                Self::commit_count(event) as f64,
                dimensions.clone(),
            )];
        }

        let merged = payload::str_at(data, &["pullrequest", "state"])
            .is_some_and(|state| state.eq_ignore_ascii_case("merged"));
        if event_type == "pull_request" && merged {
            let lead_time = payload::seconds_between(
                data,
                &["pullrequest", "created_on"],
                &["pullrequest", "updated_on"],
            );
            return merge_observations(source, lead_time, dimensions);
        }

        Vec::new()
    }
}
