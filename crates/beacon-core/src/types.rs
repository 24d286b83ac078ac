use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// ColorClass
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorClass {
    Start,
    #[default]
    Progress,
    Success,
    Failure,
    Skipped,
}

impl ColorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ColorClass::Start => "start",
            ColorClass::Progress => "progress",
            ColorClass::Success => "success",
            ColorClass::Failure => "failure",
            ColorClass::Skipped => "skipped",
        }
    }

    pub fn is_failure(self) -> bool {
        self == ColorClass::Failure
    }
}

impl fmt::Display for ColorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// StepPolicy
// ---------------------------------------------------------------------------

/// How a repeated step description is recorded within a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPolicy {
    /// Every event appends its step.
    #[default]
    AppendAlways,
    /// Skip the step when it equals the last recorded one.
    SkipConsecutive,
    /// Skip the step when it already appears anywhere in the phase.
    SkipExisting,
}

impl StepPolicy {
    pub fn should_append(self, steps: &[String], step: &str) -> bool {
        match self {
            StepPolicy::AppendAlways => true,
            StepPolicy::SkipConsecutive => steps.last().map(String::as_str) != Some(step),
            StepPolicy::SkipExisting => !steps.iter().any(|s| s == step),
        }
    }
}

// ---------------------------------------------------------------------------
// PhaseOrder
// ---------------------------------------------------------------------------

/// Base ordering of phase sections before the renderer reverses them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseOrder {
    /// Sort by `started_at`, ties broken by first appearance.
    #[default]
    Chronological,
    /// Listed names first in the given order, unlisted phases after them
    /// chronologically.
    Canonical(Vec<String>),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
