use serde::{Deserialize, Serialize};
use std::fmt;

use crate::engine::CallFailure;
use crate::error::StoryworkError;

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Pipeline stage at which a work item failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Resolve,
    Extract,
    Context,
    Transform,
    Validate,
    Persist,
    /// The worker task itself died (panic or abort).
    Dispatch,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Resolve => "resolve",
            Stage::Extract => "extract",
            Stage::Context => "context",
            Stage::Transform => "transform",
            Stage::Validate => "validate",
            Stage::Persist => "persist",
            Stage::Dispatch => "dispatch",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ItemFailure
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ItemFailure {
    pub stage: Stage,
    pub message: String,
    /// Retryable-class failure that exhausted its budget. Feeds the breaker.
    pub transport: bool,
    /// Transform output that was rejected, kept for diagnosis.
    pub output: Option<String>,
}

impl ItemFailure {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            transport: false,
            output: None,
        }
    }

    pub fn from_call(stage: Stage, failure: CallFailure) -> Self {
        Self {
            stage,
            transport: failure.is_transport(),
            message: failure.to_string(),
            output: None,
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn from_error(stage: Stage, err: StoryworkError) -> Self {
        match err {
            StoryworkError::Remote(failure) => Self::from_call(stage, failure),
            other => Self::new(stage, other.to_string()),
        }
    }
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.stage, self.message)
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Terminal result of processing one work item.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed { location: String },
    Failed(ItemFailure),
    /// Nothing to do for this item. Not an error.
    Skipped { reason: String },
    /// Dry run: the work was prepared but nothing external was called or written.
    Previewed { detail: String },
}

impl Outcome {
    pub fn failed(stage: Stage, message: impl Into<String>) -> Self {
        Outcome::Failed(ItemFailure::new(stage, message))
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Outcome::Skipped {
            reason: reason.into(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Completed { .. } => "done",
            Outcome::Failed(_) => "fail",
            Outcome::Skipped { .. } => "skip",
            Outcome::Previewed { .. } => "dry-run",
        }
    }
}
