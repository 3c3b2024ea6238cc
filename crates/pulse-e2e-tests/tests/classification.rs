//! End-to-end tests for ingestion and classification.
//!
//! These tests verify:
//! 1. Directory and filetype metrics for a push
//! 2. Contributions summed across files and events
//! 3. The generic count metric for unknown sources
//! 4. Dimension extractor properties

mod helpers;

use proptest::prelude::*;
use serde_json::{Map, Value, json};

use pulse_classify::{
    EventClassifier, extract_branch, extract_commit_count, extract_org_from_repo,
    parse_raw_event,
};
use pulse_core::{Event, RawEvent};

use helpers::{PUSH, TestPipeline, github_push};

fn event_with(data: Value) -> Event {
    let Value::Object(map) = data else {
        panic!("payload must be an object");
    };
    Event::new("github.push", "github", map).unwrap()
}

// ============================================================================
// Push: directories and filetypes
// ============================================================================

#[test]
fn test_push_produces_directory_and_filetype_metrics() {
    let pipeline = TestPipeline::start();
    pipeline.ingest(github_push(PUSH, "push-1"));
    let report = pipeline.drain();
    assert_eq!(report.dead_lettered, 0);

    assert_eq!(
        pipeline.values_by("github.directory_changes", "directory"),
        vec![("app/models".to_string(), 1.0), ("root".to_string(), 1.0)]
    );
    assert_eq!(
        pipeline.values_by("github.filetype_changes", "filetype"),
        vec![("md".to_string(), 1.0), ("rb".to_string(), 1.0)]
    );
    assert_eq!(
        pipeline.values_by("github.push_count", "repository"),
        vec![("octocat/hello-world".to_string(), 1.0)]
    );
}

#[test]
fn test_push_dimensions_are_attached() {
    let pipeline = TestPipeline::start();
    pipeline.ingest(github_push(PUSH, "push-1"));
    pipeline.drain();

    let rows = pipeline.rows("github.directory_changes", pulse_core::Granularity::FiveMinutes);
    assert_eq!(rows.len(), 2);
    for row in rows {
        assert_eq!(row.dimensions.get("repository"), Some("octocat/hello-world"));
        assert_eq!(row.dimensions.get("organization"), Some("octocat"));
        assert_eq!(row.dimensions.get("branch"), Some("main"));
        assert_eq!(row.dimensions.get("source"), Some("github"));
    }
}

#[test]
fn test_contributions_sum_across_files_and_events() {
    let pipeline = TestPipeline::start();
    pipeline.ingest(github_push(PUSH, "push-1"));

    let second = json!({
        "ref": "refs/heads/main",
        "repository": {"full_name": "octocat/hello-world"},
        "pusher": {"name": "octocat"},
        "head_commit": {"timestamp": "2024-03-01T10:04:00Z"},
        "commits": [
            {"added": ["app/models/y.rb"]},
            {"modified": ["app/models/x.rb", "docs/guide.md"]}
        ]
    });
    pipeline.ingest(github_push(&second.to_string(), "push-2"));
    pipeline.drain();

    assert_eq!(
        pipeline.values_by("github.directory_changes", "directory"),
        vec![
            ("app/models".to_string(), 3.0),
            ("docs".to_string(), 1.0),
            ("root".to_string(), 1.0),
        ]
    );
    assert_eq!(
        pipeline.values_by("github.filetype_changes", "filetype"),
        vec![("md".to_string(), 2.0), ("rb".to_string(), 3.0)]
    );
    assert_eq!(
        pipeline.values_by("github.push_count", "branch"),
        vec![("main".to_string(), 2.0)]
    );
}

// ============================================================================
// Unknown sources
// ============================================================================

#[test]
fn test_unknown_source_gets_generic_count() {
    let raw = RawEvent::new(r#"{"anything": 1}"#, "custom_source");
    let event = parse_raw_event(&raw).unwrap();
    let classification = EventClassifier::new().classify(&event);

    let count = classification
        .metrics
        .iter()
        .find(|m| m.name.as_str().ends_with("_count"))
        .expect("generic count metric");
    assert!(count.name.as_str().starts_with("custom_source."));
    assert_eq!(count.value, 1.0);
    assert_eq!(
        count.dimensions.iter().collect::<Vec<_>>(),
        vec![("source", "custom_source")]
    );
}

#[test]
fn test_unknown_source_flows_through_pipeline() {
    let pipeline = TestPipeline::start();
    for i in 0..3 {
        pipeline.ingest(
            RawEvent::new(r#"{"event_type": "deploy"}"#, "custom_source")
                .with_delivery_id(format!("custom-{i}")),
        );
    }
    pipeline.drain();

    assert_eq!(
        pipeline.values_by("custom_source.deploy_count", "source"),
        vec![("custom_source".to_string(), 3.0)]
    );
}

#[test]
fn test_malformed_payload_is_rejected_not_coerced() {
    let raw = RawEvent::new("{\"commits\": [", "github");
    assert!(parse_raw_event(&raw).is_err());

    let pipeline = TestPipeline::start();
    pipeline.ingest(raw);
    let report = pipeline.drain();
    assert_eq!(report.dead_lettered, 1);
    assert_eq!(pipeline.storage.event_count(), 0);
    assert_eq!(pipeline.storage.metric_count(), 0);
}

// ============================================================================
// Dimension extractor properties
// ============================================================================

#[test]
fn test_missing_commits_count_as_one() {
    assert_eq!(extract_commit_count(&event_with(json!({}))), 1);
    assert_eq!(
        extract_commit_count(&event_with(json!({"ref": "refs/heads/main"}))),
        1
    );
}

#[test]
fn test_missing_repository_is_unknown_org() {
    assert_eq!(extract_org_from_repo(None), "unknown");
}

proptest! {
    #[test]
    fn prop_org_is_prefix_of_full_name(
        org in "[a-z][a-z0-9-]{0,15}",
        repo in "[a-z][a-z0-9_.-]{0,15}",
    ) {
        let full_name = format!("{org}/{repo}");
        prop_assert_eq!(extract_org_from_repo(Some(full_name.as_str())), org);
    }

    #[test]
    fn prop_branch_and_tag_refs_are_stripped(
        name in "[a-z][a-z0-9_-]{0,15}",
        tag in any::<bool>(),
    ) {
        let prefix = if tag { "refs/tags/" } else { "refs/heads/" };
        let event = event_with(json!({"ref": format!("{prefix}{name}")}));
        prop_assert_eq!(extract_branch(&event), name);
    }

    #[test]
    fn prop_other_refs_are_unknown(name in "[a-z][a-z0-9_-]{0,15}") {
        let event = event_with(json!({"ref": name}));
        prop_assert_eq!(extract_branch(&event), "unknown");
    }

    #[test]
    fn prop_events_without_commits_count_one(keys in prop::collection::vec("[a-z]{1,8}", 0..5)) {
        let mut map = Map::new();
        for key in keys {
            if key != "commits" {
                map.insert(key, Value::from(1));
            }
        }
        let event = Event::new("github.push", "github", map).unwrap();
        prop_assert_eq!(extract_commit_count(&event), 1);
    }
}
