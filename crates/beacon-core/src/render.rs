//! Turn a [`RunState`] into the sections of the outward status message.
//!
//! Rendering is pure: the same state and header always give byte-identical
//! output. Sections are a header followed by one block per phase, newest
//! phase first.

use crate::config::{BeaconConfig, Palette};
use crate::state::{Phase, RunState};
use crate::types::PhaseOrder;
use serde::Serialize;
use serde_json::{json, Value};

/// Pipeline metadata shown in the header, supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Header {
    pub title: String,
    pub branch: String,
    pub user: String,
    pub build_url: String,
    pub repo: String,
    pub build_num: String,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            title: BeaconConfig::default().title,
            branch: "unknown".to_string(),
            user: "unknown".to_string(),
            build_url: "#".to_string(),
            repo: "repo".to_string(),
            build_num: "0".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    /// `#RRGGBB` accent shown beside the section.
    pub accent: String,
    /// Slack mrkdwn body.
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayPayload {
    pub sections: Vec<Section>,
    /// Plain-text summary for notifications and clients without attachments.
    pub fallback: String,
}

impl DisplayPayload {
    /// The payload as Slack legacy attachments with block content.
    pub fn to_slack_attachments(&self) -> Value {
        Value::Array(
            self.sections
                .iter()
                .map(|s| {
                    let mut blocks = vec![json!({
                        "type": "section",
                        "text": { "type": "mrkdwn", "text": s.text },
                    })];
                    if let Some(ctx) = &s.context {
                        blocks.push(json!({
                            "type": "context",
                            "elements": [{ "type": "mrkdwn", "text": ctx }],
                        }));
                    }
                    json!({ "color": s.accent, "blocks": blocks })
                })
                .collect(),
        )
    }
}

/// Escape the three characters Slack mrkdwn treats as control characters.
pub fn escape_mrkdwn(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Renderer {
    palette: Palette,
    order: PhaseOrder,
}

impl Renderer {
    pub fn new(palette: Palette, order: PhaseOrder) -> Self {
        Self { palette, order }
    }

    pub fn from_config(cfg: &BeaconConfig) -> Self {
        Self::new(cfg.palette.clone(), cfg.phase_order.clone())
    }

    pub fn render(&self, state: &RunState, header: &Header) -> DisplayPayload {
        let mut sections = vec![self.header_section(header)];
        sections.extend(
            self.ordered(&state.phases)
                .into_iter()
                .rev()
                .map(|p| self.phase_section(p)),
        );
        DisplayPayload {
            sections,
            fallback: fallback_text(state, header),
        }
    }

    /// Phases in base display order, before reversal.
    pub fn ordered<'p>(&self, phases: &'p [Phase]) -> Vec<&'p Phase> {
        // Stable sort: equal keys stay in first-appearance order.
        let mut by_start: Vec<&Phase> = phases.iter().collect();
        by_start.sort_by_key(|p| p.started_at);

        match &self.order {
            PhaseOrder::Chronological => by_start,
            PhaseOrder::Canonical(names) => {
                let rank = |p: &Phase| names.iter().position(|n| *n == p.name);
                let mut listed: Vec<&Phase> = by_start
                    .iter()
                    .copied()
                    .filter(|p| rank(*p).is_some())
                    .collect();
                listed.sort_by_key(|p| rank(*p));
                listed.extend(by_start.into_iter().filter(|p| rank(*p).is_none()));
                listed
            }
        }
    }

    fn header_section(&self, h: &Header) -> Section {
        Section {
            accent: self.palette.header.clone(),
            text: format!(
                "🚀 *{}*\n\n*Branch:* `{}` | *User:* `{}`\n<{}|View Pipeline>",
                escape_mrkdwn(&h.title),
                escape_mrkdwn(&h.branch),
                escape_mrkdwn(&h.user),
                h.build_url,
            ),
            context: Some(format!(
                ":gear: `{}` | :hash: Build #{}",
                escape_mrkdwn(&h.repo),
                escape_mrkdwn(&h.build_num),
            )),
        }
    }

    fn phase_section(&self, phase: &Phase) -> Section {
        let steps = phase
            .steps
            .iter()
            .map(|s| format!("• {}", escape_mrkdwn(s)))
            .collect::<Vec<_>>()
            .join("\n");
        Section {
            accent: self.palette.color_for(phase.color).to_string(),
            text: format!("{}\n\n*Steps:*\n{}", escape_mrkdwn(&phase.status), steps),
            context: None,
        }
    }
}

fn fallback_text(state: &RunState, header: &Header) -> String {
    let latest = state.phases.iter().max_by_key(|p| p.last_updated);
    match latest {
        Some(p) => format!("{}: {} ({})", header.title, p.status, p.name),
        None => header.title.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
