//! Fallback for sources without a dedicated handler.

use pulse_core::{Dimensions, Event, MetricObservation, SourceKind};

use super::SourceHandler;

/// Handler for unknown sources: dimensions are `{source}` only and no
/// metrics beyond the count are produced.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericHandler;

impl SourceHandler for GenericHandler {
    fn kind(&self) -> SourceKind {
        SourceKind::Unknown
    }

    fn dimensions(&self, event: &Event) -> Dimensions {
        Dimensions::new().with("source", event.source().as_str())
    }

    fn observations(&self, _event: &Event, _dimensions: &Dimensions) -> Vec<MetricObservation> {
        Vec::new()
    }
}
