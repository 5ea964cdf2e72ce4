//! Ordered line transformations applied to captured command output.

mod grep;
mod ordering;
mod window;

use std::fmt;
use std::str::FromStr;

use regex::Regex;

use crate::error::ValidationError;

pub use self::grep::GrepStage;
pub use self::ordering::{SortStage, UniqueStage};
pub use self::window::{HeadStage, TailStage};

// ---------------------------------------------------------------------------
// TransformStep
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformStep {
    Grep,
    Sort,
    Unique,
    Head,
    Tail,
}

impl TransformStep {
    pub const DEFAULT_ORDER: [Self; 5] = [Self::Grep, Self::Sort, Self::Unique, Self::Head, Self::Tail];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Grep => "grep",
            Self::Sort => "sort",
            Self::Unique => "unique",
            Self::Head => "head",
            Self::Tail => "tail",
        }
    }
}

impl fmt::Display for TransformStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TransformStep {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "grep" => Ok(Self::Grep),
            "sort" => Ok(Self::Sort),
            "unique" => Ok(Self::Unique),
            "head" => Ok(Self::Head),
            "tail" => Ok(Self::Tail),
            other => Err(ValidationError::InvalidTransformOrder {
                step: other.to_owned(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// TransformationSpec
// ---------------------------------------------------------------------------

/// Validated transformation parameters of one request.
#[derive(Debug, Clone)]
pub struct TransformationSpec {
    grep: Option<Regex>,
    invert_grep: bool,
    sort: bool,
    unique: bool,
    head: Option<usize>,
    tail: Option<usize>,
    order: Vec<TransformStep>,
}

impl Default for TransformationSpec {
    fn default() -> Self {
        Self {
            grep: None,
            invert_grep: false,
            sort: false,
            unique: false,
            head: None,
            tail: None,
            order: TransformStep::DEFAULT_ORDER.to_vec(),
        }
    }
}

impl TransformationSpec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// `InvalidPattern` when `pattern` is not a valid regex.
    pub fn with_grep(mut self, pattern: &str) -> Result<Self, ValidationError> {
        let regex = Regex::new(pattern).map_err(|e| ValidationError::InvalidPattern {
            message: e.to_string(),
        })?;
        self.grep = Some(regex);
        Ok(self)
    }

    #[must_use]
    pub fn with_invert_grep(mut self, invert: bool) -> Self {
        self.invert_grep = invert;
        self
    }

    #[must_use]
    pub fn with_sort(mut self, sort: bool) -> Self {
        self.sort = sort;
        self
    }

    #[must_use]
    pub fn with_unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    #[must_use]
    pub fn with_head(mut self, head: Option<usize>) -> Self {
        self.head = head;
        self
    }

    #[must_use]
    pub fn with_tail(mut self, tail: Option<usize>) -> Self {
        self.tail = tail;
        self
    }

    /// Replace the step order. Repeated steps keep their first position.
    ///
    /// # Errors
    ///
    /// `InvalidTransformOrder` for any unknown step name.
    pub fn with_order<S: AsRef<str>>(mut self, steps: &[S]) -> Result<Self, ValidationError> {
        let mut order = Vec::with_capacity(steps.len());
        for step in steps {
            let step: TransformStep = step.as_ref().parse()?;
            if !order.contains(&step) {
                order.push(step);
            }
        }
        self.order = order;
        Ok(self)
    }

    #[must_use]
    pub fn order(&self) -> &[TransformStep] {
        &self.order
    }

    /// True when no transformation would change the output. `invert_grep`
    /// alone does not count: it only modifies a grep pattern.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.grep.is_none()
            && !self.sort
            && !self.unique
            && self.head.is_none()
            && self.tail.is_none()
    }
}

// ---------------------------------------------------------------------------
// LineStage trait
// ---------------------------------------------------------------------------

/// One transformation over the full line list.
pub trait LineStage: Send + Sync {
    fn step(&self) -> TransformStep;
    fn apply(&self, lines: Vec<String>) -> Vec<String>;
}

// ---------------------------------------------------------------------------
// TransformationPipeline
// ---------------------------------------------------------------------------

/// Line counts before and after the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterStats {
    pub raw_lines: usize,
    pub filtered_lines: usize,
}

/// Stages in effective order. Steps whose parameter is unset are not built.
#[derive(Default)]
pub struct TransformationPipeline {
    stages: Vec<Box<dyn LineStage>>,
}

impl TransformationPipeline {
    #[must_use]
    pub fn from_spec(spec: &TransformationSpec) -> Self {
        let mut stages: Vec<Box<dyn LineStage>> = Vec::with_capacity(spec.order.len());
        for step in &spec.order {
            match step {
                TransformStep::Grep => {
                    if let Some(regex) = &spec.grep {
                        stages.push(Box::new(GrepStage::new(regex.clone(), spec.invert_grep)));
                    }
                }
                TransformStep::Sort if spec.sort => stages.push(Box::new(SortStage)),
                TransformStep::Unique if spec.unique => stages.push(Box::new(UniqueStage)),
                TransformStep::Head => {
                    if let Some(n) = spec.head {
                        stages.push(Box::new(HeadStage::new(n)));
                    }
                }
                TransformStep::Tail => {
                    if let Some(n) = spec.tail {
                        stages.push(Box::new(TailStage::new(n)));
                    }
                }
                TransformStep::Sort | TransformStep::Unique => {}
            }
        }
        Self { stages }
    }

    #[must_use]
    pub fn steps(&self) -> Vec<TransformStep> {
        self.stages.iter().map(|s| s.step()).collect()
    }

    #[must_use]
    pub fn run(&self, lines: Vec<String>) -> (Vec<String>, FilterStats) {
        let raw_lines = lines.len();
        let out = self
            .stages
            .iter()
            .fold(lines, |current, stage| stage.apply(current));
        let stats = FilterStats {
            raw_lines,
            filtered_lines: out.len(),
        };
        (out, stats)
    }
}

impl fmt::Debug for TransformationPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformationPipeline")
            .field("stages", &self.steps())
            .finish()
    }
}

/// Apply `spec` to `lines`. Pure; an empty spec returns the input unchanged.
#[must_use]
pub fn apply(lines: Vec<String>, spec: &TransformationSpec) -> Vec<String> {
    TransformationPipeline::from_spec(spec).run(lines).0
}
