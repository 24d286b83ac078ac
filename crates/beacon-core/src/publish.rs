//! Create-or-amend of the single outward status message for a run.
//!
//! The run's `message_id` is persisted only after the message exists, so a
//! crash in between costs at most one orphaned message; the next invocation
//! creates a fresh one and records that instead.

use crate::engine::MergeEngine;
use crate::error::{BeaconError, Result};
use crate::render::DisplayPayload;
use crate::slack::SlackClient;
use crate::state::RunState;
use serde::Serialize;

pub trait MessageBackend {
    /// Post a new message and return its id.
    fn create(&self, payload: &DisplayPayload) -> Result<String>;

    /// Edit an existing message in place. `MessageNotFound` if it is gone.
    fn amend(&self, message_id: &str, payload: &DisplayPayload) -> Result<()>;

    /// Remove a message this invocation created but lost ownership of.
    fn retract(&self, message_id: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// SlackMessenger
// ---------------------------------------------------------------------------

/// Posts the payload as attachments to one Slack channel.
#[derive(Debug, Clone)]
pub struct SlackMessenger {
    client: SlackClient,
    channel: String,
}

impl SlackMessenger {
    pub fn new(client: SlackClient, channel: impl Into<String>) -> Self {
        Self {
            client,
            channel: channel.into(),
        }
    }
}

impl MessageBackend for SlackMessenger {
    fn create(&self, payload: &DisplayPayload) -> Result<String> {
        let attachments = payload.to_slack_attachments();
        self.client
            .post_message(&self.channel, &payload.fallback, Some(&attachments))
            .map_err(|e| e.into_publish_error())
    }

    fn amend(&self, message_id: &str, payload: &DisplayPayload) -> Result<()> {
        let attachments = payload.to_slack_attachments();
        self.client
            .update_message(&self.channel, message_id, &payload.fallback, Some(&attachments))
            .map_err(|e| e.into_publish_error())
    }

    fn retract(&self, message_id: &str) -> Result<()> {
        self.client
            .delete_message(&self.channel, message_id)
            .map_err(|e| e.into_publish_error())
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishAction {
    /// First message for the run.
    Created,
    /// Existing message edited in place.
    Amended,
    /// Recorded message had been deleted; a new one replaced it.
    Recreated,
    /// Another invocation created the run message first; ours was retracted
    /// and theirs amended.
    Adopted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Published {
    pub message_id: String,
    pub action: PublishAction,
}

pub struct Publisher<'a> {
    engine: &'a MergeEngine<'a>,
    backend: &'a dyn MessageBackend,
}

impl<'a> Publisher<'a> {
    pub fn new(engine: &'a MergeEngine<'a>, backend: &'a dyn MessageBackend) -> Self {
        Self { engine, backend }
    }

    /// Show `payload` as the run's live message, creating it if needed.
    pub fn publish(&self, state: &RunState, payload: &DisplayPayload) -> Result<Published> {
        let run_id = state.run_id.as_str();

        if let Some(existing) = state.message_id.as_deref() {
            match self.backend.amend(existing, payload) {
                Ok(()) => {
                    tracing::info!(run_id, message_id = existing, "amended run message");
                    return Ok(Published {
                        message_id: existing.to_string(),
                        action: PublishAction::Amended,
                    });
                }
                Err(BeaconError::MessageNotFound(reason)) => {
                    tracing::warn!(run_id, message_id = existing, %reason, "run message gone; posting a new one");
                    let created = self.backend.create(payload)?;
                    return self.associate(
                        run_id,
                        created,
                        Some(existing),
                        PublishAction::Recreated,
                        payload,
                    );
                }
                Err(e) => return Err(e),
            }
        }

        let created = self.backend.create(payload)?;
        self.associate(run_id, created, None, PublishAction::Created, payload)
    }

    /// Record `created` as the run's message. If another invocation got
    /// there first, drop ours and bring the owner's message up to date.
    fn associate(
        &self,
        run_id: &str,
        created: String,
        replacing: Option<&str>,
        action: PublishAction,
        payload: &DisplayPayload,
    ) -> Result<Published> {
        tracing::info!(run_id, message_id = %created, ?action, "posted run message");
        let persisted = self.engine.record_message_id(run_id, &created, replacing)?;

        let owner = match persisted.message_id {
            Some(owner) if owner != created => owner,
            _ => {
                return Ok(Published {
                    message_id: created,
                    action,
                })
            }
        };

        if let Err(e) = self.backend.retract(&created) {
            tracing::warn!(run_id, message_id = %created, error = %e, "failed to retract duplicate run message");
        }
        match self.backend.amend(&owner, payload) {
            Ok(()) => {
                tracing::info!(run_id, message_id = %owner, "amended adopted run message");
                Ok(Published {
                    message_id: owner,
                    action: PublishAction::Adopted,
                })
            }
            Err(BeaconError::MessageNotFound(reason)) => {
                tracing::warn!(run_id, message_id = %owner, %reason, "adopted run message gone; posting a new one");
                let fresh = self.backend.create(payload)?;
                self.associate(run_id, fresh, Some(&owner), PublishAction::Recreated, payload)
            }
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
