//! Read-merge-write of [`RunState`] records over a [`StateStore`].
//!
//! A run is one logical record. Each write is conditional on the revision
//! that was read, so concurrent invocations for the same run (typically
//! different phases on different executors) never interleave partial
//! records: the loser re-reads, re-applies its event, and writes again, up
//! to `RetryPolicy::max_attempts` times.

use crate::config::{BeaconConfig, RetryPolicy};
use crate::error::{BeaconError, Result};
use crate::paths;
use crate::state::{PhaseEvent, PhaseOutcome, RunState};
use crate::store::StateStore;
use crate::types::StepPolicy;
use chrono::{DateTime, Utc};

/// Result of merging one event.
#[derive(Debug, Clone)]
pub struct Applied {
    pub state: RunState,
    pub outcome: PhaseOutcome,
    pub attempts: u32,
}

pub struct MergeEngine<'a> {
    store: &'a dyn StateStore,
    policy: StepPolicy,
    retry: RetryPolicy,
}

impl<'a> MergeEngine<'a> {
    pub fn new(store: &'a dyn StateStore, policy: StepPolicy, retry: RetryPolicy) -> Self {
        Self {
            store,
            policy,
            retry,
        }
    }

    pub fn from_config(store: &'a dyn StateStore, cfg: &BeaconConfig) -> Self {
        Self::new(store, cfg.step_policy, cfg.retry_policy())
    }

    pub fn load(&self, run_id: &str) -> Result<Option<RunState>> {
        paths::validate_run_id(run_id)?;
        Ok(self.store.get(run_id)?.map(|r| r.state))
    }

    pub fn apply_event(&self, run_id: &str, event: &PhaseEvent) -> Result<Applied> {
        self.apply_event_at(run_id, event, Utc::now())
    }

    /// Merge `event` into the run's record, creating the record if absent.
    pub fn apply_event_at(
        &self,
        run_id: &str,
        event: &PhaseEvent,
        now: DateTime<Utc>,
    ) -> Result<Applied> {
        event.validate()?;
        let mut outcome = PhaseOutcome::Created;
        let (state, attempts) = self.modify(run_id, now, |state| {
            outcome = state.apply(event, self.policy, now);
            true
        })?;
        if outcome == PhaseOutcome::Locked {
            tracing::info!(run_id, phase = %event.phase, "phase already failed; recorded step only");
        }
        Ok(Applied {
            state,
            outcome,
            attempts,
        })
    }

    /// Associate `message_id` with the run.
    ///
    /// With `replacing: None` the id is only written if the run has none.
    /// With `replacing: Some(stale)` it overwrites `stale` and nothing else.
    /// Returns the persisted state, whose `message_id` may differ from the
    /// requested one if another invocation got there first.
    pub fn record_message_id(
        &self,
        run_id: &str,
        message_id: &str,
        replacing: Option<&str>,
    ) -> Result<RunState> {
        let now = Utc::now();
        let (state, _) = self.modify(run_id, now, |state| {
            if state.message_id.as_deref() == Some(message_id) {
                return false;
            }
            let accepted = state.set_message_id(message_id, replacing);
            if accepted {
                state.updated_at = now;
            }
            accepted
        })?;
        if state.message_id.as_deref() != Some(message_id) {
            tracing::warn!(
                run_id,
                ours = message_id,
                theirs = ?state.message_id,
                "another invocation already owns the run message; keeping theirs"
            );
        }
        Ok(state)
    }

    /// Generic conditional-write loop. `f` mutates the state and returns
    /// whether anything needs writing.
    fn modify(
        &self,
        run_id: &str,
        now: DateTime<Utc>,
        mut f: impl FnMut(&mut RunState) -> bool,
    ) -> Result<(RunState, u32)> {
        paths::validate_run_id(run_id)?;
        let mut last_err: Option<BeaconError> = None;

        for attempt in 1..=self.retry.max_attempts {
            let result = match self.store.get(run_id) {
                Ok(Some(record)) => {
                    let mut state = record.state.clone();
                    if f(&mut state) {
                        self.store.update(&record.handle, &state).map(|r| r.state)
                    } else {
                        Ok(record.state)
                    }
                }
                Ok(None) => {
                    let mut state = RunState::new(run_id, now);
                    f(&mut state);
                    self.store.put(&state).map(|r| r.state)
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(state) => return Ok((state, attempt)),
                Err(e) if e.is_retryable() || matches!(e, BeaconError::NotFound(_)) => {
                    tracing::warn!(
                        run_id,
                        attempt,
                        store = self.store.name(),
                        error = %e,
                        "run record write lost a race or failed; retrying"
                    );
                    last_err = Some(e);
                    if attempt < self.retry.max_attempts {
                        std::thread::sleep(self.retry.backoff(attempt));
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(BeaconError::StoreUnavailable(format!(
            "gave up on run '{run_id}' after {} attempts: {}",
            self.retry.max_attempts,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
