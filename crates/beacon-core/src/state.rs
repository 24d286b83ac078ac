use crate::error::Result;
use crate::paths;
use crate::types::{ColorClass, StepPolicy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// PhaseEvent
// ---------------------------------------------------------------------------

/// One reported pipeline event: a phase entering a status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseEvent {
    pub phase: String,
    pub status: String,
    pub step: String,
    pub color: ColorClass,
    #[serde(default)]
    pub is_final: bool,
}

impl PhaseEvent {
    pub fn new(
        phase: impl Into<String>,
        status: impl Into<String>,
        step: impl Into<String>,
        color: ColorClass,
    ) -> Self {
        Self {
            phase: phase.into(),
            status: status.into(),
            step: step.into(),
            color,
            is_final: false,
        }
    }

    pub fn final_event(mut self) -> Self {
        self.is_final = true;
        self
    }

    pub fn validate(&self) -> Result<()> {
        paths::validate_phase_name(&self.phase)
    }
}

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    pub status: String,
    pub color: ColorClass,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub is_final: bool,
    pub started_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Phase {
    fn from_event(event: &PhaseEvent, now: DateTime<Utc>) -> Self {
        Self {
            name: event.phase.clone(),
            status: event.status.clone(),
            color: event.color,
            steps: vec![event.step.clone()],
            is_final: event.is_final,
            started_at: now,
            last_updated: now,
        }
    }

    /// A failed phase keeps its status, color, and finality for good.
    pub fn is_locked(&self) -> bool {
        self.color.is_failure()
    }
}

/// What [`RunState::apply`] did to the targeted phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseOutcome {
    Created,
    Updated,
    /// The phase had already failed; only the step history may have grown.
    Locked,
}

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    #[serde(default)]
    pub phases: Vec<Phase>,
    #[serde(default)]
    pub message_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped by the store on every successful write.
    #[serde(default)]
    pub revision: u64,
}

impl RunState {
    pub fn new(run_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            phases: Vec::new(),
            message_id: None,
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    pub fn phase(&self, name: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.name == name)
    }

    /// Merge one event into the run.
    ///
    /// Unknown phases are appended in first-seen order. Known phases take the
    /// event's status, color, and finality unless they are failure-locked;
    /// the step is recorded according to `policy` either way.
    pub fn apply(
        &mut self,
        event: &PhaseEvent,
        policy: StepPolicy,
        now: DateTime<Utc>,
    ) -> PhaseOutcome {
        self.updated_at = now;

        let Some(phase) = self.phases.iter_mut().find(|p| p.name == event.phase) else {
            self.phases.push(Phase::from_event(event, now));
            return PhaseOutcome::Created;
        };

        let outcome = if phase.is_locked() {
            PhaseOutcome::Locked
        } else {
            phase.status = event.status.clone();
            phase.color = event.color;
            phase.is_final = event.is_final;
            PhaseOutcome::Updated
        };

        if policy.should_append(&phase.steps, &event.step) {
            phase.steps.push(event.step.clone());
        }
        phase.last_updated = now;
        outcome
    }

    /// Record the live outward message. Refuses to replace a different id
    /// unless `expected` names the id being replaced.
    pub fn set_message_id(&mut self, message_id: &str, expected: Option<&str>) -> bool {
        match (&self.message_id, expected) {
            (None, _) => {}
            (Some(current), Some(stale)) if current == stale => {}
            (Some(current), _) if current == message_id => return true,
            _ => return false,
        }
        self.message_id = Some(message_id.to_string());
        true
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
