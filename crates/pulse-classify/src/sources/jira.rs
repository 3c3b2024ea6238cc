//! Jira webhooks.

use pulse_core::{Dimensions, Event, MetricObservation, SourceKind};
use serde_json::Value;

use super::{SourceHandler, base_dimensions, observation};
use crate::payload;

/// Handler for `jira` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct JiraHandler;

impl SourceHandler for JiraHandler {
    fn kind(&self) -> SourceKind {
        SourceKind::Jira
    }

    fn dimensions(&self, event: &Event) -> Dimensions {
        let data = event.data();
        let mut dims = base_dimensions(event);
        dims.insert_or_unknown(
            "project",
            payload::first_str(
                data,
                &[
                    &["issue", "fields", "project", "key"],
                    &["issue", "fields", "project", "name"],
                ],
            ),
        );
        dims.insert_or_unknown(
            "issue_type",
            payload::str_at(data, &["issue", "fields", "issuetype", "name"]),
        );
        dims.insert_or_unknown(
            "priority",
            payload::str_at(data, &["issue", "fields", "priority", "name"]),
        );
        dims.insert_or_unknown(
            "status",
            payload::str_at(data, &["issue", "fields", "status", "name"]),
        );
        dims.insert_or_unknown(
            "assignee",
            payload::first_str(
                data,
                &[
                    &["issue", "fields", "assignee", "displayName"],
                    &["issue", "fields", "assignee", "name"],
                ],
            ),
        );
        dims.insert_or_unknown(
            "author",
            payload::first_str(data, &[&["user", "displayName"], &["user", "name"]]),
        );
        dims
    }

    fn observations(&self, event: &Event, dimensions: &Dimensions) -> Vec<MetricObservation> {
        let Some(items) = payload::array_at(event.data(), &["changelog", "items"]) else {
            return Vec::new();
        };

        items
            .iter()
            .filter_map(Value::as_object)
            .filter(|item| payload::str_at(item, &["field"]) == Some("status"))
            .map(|item| {
                let mut dims = dimensions.clone();
                dims.insert_or_unknown("from_status", payload::str_at(item, &["fromString"]));
                dims.insert_or_unknown("to_status", payload::str_at(item, &["toString"]));
                observation(event.source(), "status_transition_count", 1.0, dims)
            })
            .collect()
    }
}
