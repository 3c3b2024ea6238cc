//! Task tracker notifications.

use pulse_core::{Dimensions, Event, MetricObservation, SourceKind};

use super::{SourceHandler, base_dimensions, observation};
use crate::payload;

/// Status values that mark a task as finished.
const COMPLETED: [&str; 3] = ["completed", "done", "closed"];

/// Handler for `task` events.
///
/// Fields are read from a nested `task` object first, then from the top level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskHandler;

impl TaskHandler {
    fn field(event: &Event, name: &str) -> Option<String> {
        let data = event.data();
        [
            &["task", name, "name"][..],
            &["task", name],
            &[name, "name"],
            &[name],
        ]
        .into_iter()
        .find_map(|path| payload::scalar_at(data, path))
    }
}

impl SourceHandler for TaskHandler {
    fn kind(&self) -> SourceKind {
        SourceKind::Task
    }

    fn dimensions(&self, event: &Event) -> Dimensions {
        let mut dims = base_dimensions(event);
        for key in ["project", "assignee", "priority", "status"] {
            dims.insert_or_unknown(key, Self::field(event, key).as_deref());
        }
        dims
    }

    fn observations(&self, event: &Event, dimensions: &Dimensions) -> Vec<MetricObservation> {
        let completed = dimensions
            .get("status")
            .is_some_and(|status| COMPLETED.contains(&status.to_ascii_lowercase().as_str()));
        if completed {
            vec![observation(event.source(), "completed_count", 1.0, dimensions.clone())]
        } else {
            Vec::new()
        }
    }
}
