//! Event classification: one event in, a set of metric observations out.

use chrono::{DateTime, Utc};
use pulse_core::{Dimensions, Event, EventId, MetricObservation, Source};
use serde::Serialize;
use tracing::debug;

use crate::sources::{HandlerRegistry, observation};

/// The metrics derived from one event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    /// The classified event.
    pub event_id: EventId,
    /// The event's source.
    pub source: Source,
    /// When the event happened; decides the aggregation bucket.
    pub timestamp: DateTime<Utc>,
    /// Observations, the overall count metric first.
    pub metrics: Vec<MetricObservation>,
}

impl Classification {
    /// Returns the observations with the given metric name.
    pub fn named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a MetricObservation> {
        self.metrics.iter().filter(move |m| m.name.as_str() == name)
    }
}

/// Maps events to metric observations.
///
/// Classification performs no I/O. Every event yields at least the
/// `<source>.<event_type>_count` metric.
#[derive(Debug, Default)]
pub struct EventClassifier {
    registry: HandlerRegistry,
}

impl EventClassifier {
    /// Creates a classifier with the built-in handlers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a classifier with a custom handler registry.
    #[must_use]
    pub const fn with_registry(registry: HandlerRegistry) -> Self {
        Self { registry }
    }

    /// Returns the dimension set for an event.
    #[must_use]
    pub fn extract_dimensions(&self, event: &Event) -> Dimensions {
        self.registry.for_event(event).dimensions(event)
    }

    /// Classifies an event.
    #[must_use]
    pub fn classify(&self, event: &Event) -> Classification {
        let handler = self.registry.for_event(event);
        let dimensions = handler.dimensions(event);

        let count = observation(
            event.source(),
            &format!("{}_count", event.event_type()),
            1.0,
            dimensions.clone(),
        );
        let mut metrics = vec![count];
        metrics.extend(handler.observations(event, &dimensions));

        debug!(
            event_id = %event.id(),
            source = %event.source(),
            metrics = metrics.len(),
            "classified event"
        );

        Classification {
            event_id: event.id().clone(),
            source: event.source().clone(),
            timestamp: event.timestamp(),
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{Map, Value, json};

    fn event(name: &str, source: &str, data: Value) -> Event {
        Event::new(name, source, data.as_object().cloned().unwrap()).unwrap()
    }

    mod classify_tests {
        use super::*;

        #[test]
        fn unknown_source_gets_generic_count() {
            let event = event("deploy_finished", "custom_source", json!({"anything": 1}));
            let result = EventClassifier::new().classify(&event);

            assert_eq!(result.metrics.len(), 1);
            let count = &result.metrics[0];
            assert_eq!(count.name.as_str(), "custom_source.deploy_finished_count");
            assert!((count.value - 1.0).abs() < f64::EPSILON);
            assert_eq!(count.dimensions, Dimensions::new().with("source", "custom_source"));
        }

        #[test]
        fn count_metric_comes_first() {
            let event = event("github.push", "github", json!({"commits": [{}, {}]}));
            let result = EventClassifier::new().classify(&event);
            assert_eq!(result.metrics[0].name.as_str(), "github.push_count");
            assert_eq!(result.named("github.commits_count").count(), 1);
        }

        #[test]
        fn push_touching_model_and_readme() {
            let event = event(
                "github.push",
                "github",
                json!({
                    "ref": "refs/heads/main",
                    "repository": {"full_name": "octocat/hello-world"},
                    "commits": [{"added": ["app/models/x.rb"], "modified": ["README.md"]}]
                }),
            );
            let result = EventClassifier::new().classify(&event);

            let mut dirs: Vec<_> = result
                .named("github.directory_changes")
                .map(|o| (o.dimensions.get("directory").unwrap_or_default(), o.value))
                .collect();
            dirs.sort_by(|a, b| a.0.cmp(b.0));
            assert_eq!(dirs, vec![("app/models", 1.0), ("root", 1.0)]);

            let mut types: Vec<_> = result
                .named("github.filetype_changes")
                .map(|o| (o.dimensions.get("filetype").unwrap_or_default(), o.value))
                .collect();
            types.sort_by(|a, b| a.0.cmp(b.0));
            assert_eq!(types, vec![("md", 1.0), ("rb", 1.0)]);

            for obs in result.named("github.directory_changes") {
                assert_eq!(obs.dimensions.get("repository"), Some("octocat/hello-world"));
                assert_eq!(obs.dimensions.get("branch"), Some("main"));
            }
        }

        #[test]
        fn event_type_with_dots_is_flattened() {
            let event = event("jira.issue.updated", "jira", json!({}));
            let result = EventClassifier::new().classify(&event);
            assert_eq!(result.metrics[0].name.as_str(), "jira.issue_updated_count");
        }

        #[test]
        fn classification_carries_event_identity() {
            let event = event("gitlab.push", "gitlab", json!({}));
            let result = EventClassifier::new().classify(&event);
            assert_eq!(&result.event_id, event.id());
            assert_eq!(result.timestamp, event.timestamp());
            assert_eq!(result.source, Source::GitLab);
        }

        #[test]
        fn classify_is_deterministic() {
            let event = event(
                "github.push",
                "github",
                json!({"commits": [{"added": ["a/b.c", "d.e"]}]}),
            );
            let classifier = EventClassifier::new();
            assert_eq!(classifier.classify(&event), classifier.classify(&event));
        }
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            "[a-z/._ ]{0,12}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map(
                    prop_oneof![
                        Just("commits".to_string()),
                        Just("ref".to_string()),
                        Just("repository".to_string()),
                        Just("pull_request".to_string()),
                        Just("added".to_string()),
                        "[a-z_]{1,8}",
                    ],
                    inner,
                    0..4
                )
                .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>())),
            ]
        })
    }

    proptest! {
        #[test]
        fn classification_is_total(
            source in prop_oneof![
                Just("github"), Just("gitlab"), Just("jira"), Just("bitbucket"),
                Just("ci"), Just("task"), Just("custom_source")
            ],
            event_type in prop_oneof![
                Just("push"), Just("pull_request"), Just("issues"), Just("workflow_run"),
                Just("merge_request"), Just("pipeline"), Just("deployment_status"), Just("other")
            ],
            data in prop::collection::btree_map("[a-z_]{1,12}", arb_json(), 0..6),
        ) {
            let data: Map<String, Value> = data.into_iter().collect();
            let event = Event::new(format!("{source}.{event_type}"), source, data).unwrap();
            let result = EventClassifier::new().classify(&event);

            let expected = format!("{source}.{event_type}_count");
            prop_assert_eq!(result.metrics[0].name.as_str(), expected.as_str());
            for metric in &result.metrics {
                prop_assert!(metric.value.is_finite());
                for (_, value) in metric.dimensions.iter() {
                    prop_assert!(!value.is_empty());
                }
            }
            let dims = EventClassifier::new().extract_dimensions(&event);
            prop_assert_eq!(dims.get("source"), Some(source));
            prop_assert_eq!(&dims, &result.metrics[0].dimensions);
            if source == "custom_source" {
                prop_assert_eq!(dims.len(), 1);
            } else {
                prop_assert_eq!(dims.get("event_type"), Some(event_type));
                prop_assert!(dims.len() > 2);
            }
        }
    }
}
