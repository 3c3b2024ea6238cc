//! Generic CI notifications (Jenkins, CircleCI, Buildkite and friends
//! posting a flat build summary).

use pulse_core::{Dimensions, Event, MetricObservation, SourceKind};

use super::{SourceHandler, base_dimensions, build_observations, is_failure};
use crate::dimensions::parse_ref;
use crate::payload;

/// Handler for `ci` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct CiHandler;

impl SourceHandler for CiHandler {
    fn kind(&self) -> SourceKind {
        SourceKind::Ci
    }

    fn dimensions(&self, event: &Event) -> Dimensions {
        let data = event.data();
        let mut dims = base_dimensions(event);
        dims.insert_or_unknown(
            "repository",
            payload::first_str(data, &[&["repository", "full_name"], &["repository"], &["repo"]]),
        );
        dims.insert_or_unknown(
            "pipeline",
            payload::first_str(data, &[&["pipeline", "name"], &["pipeline"], &["workflow"], &["job"]]),
        );
        dims.insert_or_unknown(
            "branch",
            payload::first_str(data, &[&["branch"], &["ref"]]).map(|r| parse_ref(r).unwrap_or(r)),
        );
        dims.insert_or_unknown(
            "status",
            payload::first_str(data, &[&["status"], &["result"], &["state"]])
                .map(str::to_ascii_lowercase)
                .as_deref(),
        );
        dims.insert_or_unknown(
            "provider",
            payload::first_str(data, &[&["provider"], &["ci_provider"]]),
        );
        dims
    }

    fn observations(&self, event: &Event, dimensions: &Dimensions) -> Vec<MetricObservation> {
        let data = event.data();
        let status = dimensions.get("status").unwrap_or(pulse_core::UNKNOWN);
        let duration = payload::f64_at(data, &["duration"])
            .or_else(|| payload::f64_at(data, &["duration_seconds"]))
            .or_else(|| payload::seconds_between(data, &["started_at"], &["finished_at"]));
        build_observations(event.source(), is_failure(status), duration, dimensions)
    }
}
