use super::{LineStage, TransformStep};

/// Stable ascending sort by byte order.
#[derive(Debug, Clone, Copy, Default)]
pub struct SortStage;

impl LineStage for SortStage {
    fn step(&self) -> TransformStep {
        TransformStep::Sort
    }

    fn apply(&self, mut lines: Vec<String>) -> Vec<String> {
        lines.sort();
        lines
    }
}

/// Collapses runs of identical adjacent lines, like `uniq`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniqueStage;

impl LineStage for UniqueStage {
    fn step(&self) -> TransformStep {
        TransformStep::Unique
    }

    fn apply(&self, mut lines: Vec<String>) -> Vec<String> {
        lines.dedup();
        lines
    }
}
