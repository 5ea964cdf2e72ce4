use regex::Regex;

use super::{LineStage, TransformStep};

/// Keeps lines matching the pattern anywhere, or drops them when inverted.
#[derive(Debug, Clone)]
pub struct GrepStage {
    regex: Regex,
    invert: bool,
}

impl GrepStage {
    #[must_use]
    pub fn new(regex: Regex, invert: bool) -> Self {
        Self { regex, invert }
    }
}

impl LineStage for GrepStage {
    fn step(&self) -> TransformStep {
        TransformStep::Grep
    }

    fn apply(&self, lines: Vec<String>) -> Vec<String> {
        lines
            .into_iter()
            .filter(|line| self.regex.is_match(line) != self.invert)
            .collect()
    }
}
