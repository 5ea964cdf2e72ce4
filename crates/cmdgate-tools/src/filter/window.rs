use super::{LineStage, TransformStep};

#[derive(Debug, Clone, Copy)]
pub struct HeadStage {
    n: usize,
}

impl HeadStage {
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self { n }
    }
}

impl LineStage for HeadStage {
    fn step(&self) -> TransformStep {
        TransformStep::Head
    }

    fn apply(&self, mut lines: Vec<String>) -> Vec<String> {
        lines.truncate(self.n);
        lines
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TailStage {
    n: usize,
}

impl TailStage {
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self { n }
    }
}

impl LineStage for TailStage {
    fn step(&self) -> TransformStep {
        TransformStep::Tail
    }

    fn apply(&self, mut lines: Vec<String>) -> Vec<String> {
        let skip = lines.len().saturating_sub(self.n);
        lines.drain(..skip);
        lines
    }
}
