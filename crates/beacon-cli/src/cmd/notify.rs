use super::HeaderArgs;
use crate::backend::Context;
use crate::output::print_json;
use anyhow::Context as _;
use beacon_core::engine::MergeEngine;
use beacon_core::publish::{PublishAction, Publisher, SlackMessenger};
use beacon_core::render::Renderer;
use beacon_core::retention;
use beacon_core::state::{PhaseEvent, PhaseOutcome};
use beacon_core::types::ColorClass;
use clap::{Args, ValueEnum};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorArg {
    Start,
    Progress,
    Success,
    Failure,
    Skipped,
}

impl From<ColorArg> for ColorClass {
    fn from(c: ColorArg) -> Self {
        match c {
            ColorArg::Start => ColorClass::Start,
            ColorArg::Progress => ColorClass::Progress,
            ColorArg::Success => ColorClass::Success,
            ColorArg::Failure => ColorClass::Failure,
            ColorArg::Skipped => ColorClass::Skipped,
        }
    }
}

#[derive(Args, Debug)]
pub struct NotifyArgs {
    /// Pipeline run identifier
    #[arg(long, env = "CIRCLE_WORKFLOW_ID")]
    pub run_id: String,

    /// Phase name, e.g. "build" or "deploy"
    #[arg(long)]
    pub phase: String,

    /// Status line shown for the phase
    #[arg(long)]
    pub status: String,

    /// Step appended to the phase history
    #[arg(long)]
    pub step: String,

    #[arg(long, value_enum, default_value = "progress")]
    pub color: ColorArg,

    /// Mark the phase as finished
    #[arg(long = "final")]
    pub is_final: bool,

    /// Channel receiving the status message
    #[arg(long, env = "SLACK_CHANNEL")]
    pub channel: String,

    #[command(flatten)]
    pub header: HeaderArgs,
}

pub fn run(ctx: &Context, args: NotifyArgs, json: bool) -> anyhow::Result<()> {
    let cfg = ctx.load_config()?;
    let client = ctx.slack_client(&cfg)?;
    let store = ctx.open_store(&cfg, Some(&client))?;

    let swept = if cfg.sweep_on_notify {
        match retention::sweep(store.as_ref(), cfg.retention(), chrono::Utc::now()) {
            Ok(report) => report.deleted(),
            Err(e) => {
                tracing::warn!(error = %e, "retention sweep failed; continuing");
                0
            }
        }
    } else {
        0
    };

    let mut event = PhaseEvent::new(&args.phase, &args.status, &args.step, args.color.into());
    if args.is_final {
        event = event.final_event();
    }

    let engine = MergeEngine::from_config(store.as_ref(), &cfg);
    let applied = engine
        .apply_event(&args.run_id, &event)
        .with_context(|| format!("failed to record '{}' for run '{}'", args.phase, args.run_id))?;

    let header = args.header.to_header(&cfg);
    let payload = Renderer::from_config(&cfg).render(&applied.state, &header);
    let messenger = SlackMessenger::new(client, &args.channel);
    let published = Publisher::new(&engine, &messenger)
        .publish(&applied.state, &payload)
        .with_context(|| format!("failed to publish status for run '{}'", args.run_id))?;

    if json {
        print_json(&serde_json::json!({
            "run_id": args.run_id,
            "phase": args.phase,
            "outcome": applied.outcome,
            "revision": applied.state.revision,
            "message_id": published.message_id,
            "action": published.action,
            "swept": swept,
        }))?;
    } else {
        let outcome = match applied.outcome {
            PhaseOutcome::Created => "added",
            PhaseOutcome::Updated => "updated",
            PhaseOutcome::Locked => "kept failed",
        };
        let action = match published.action {
            PublishAction::Created => "posted",
            PublishAction::Amended => "amended",
            PublishAction::Recreated => "re-posted",
            PublishAction::Adopted => "adopted",
        };
        println!(
            "run '{}': phase '{}' {outcome}; message {} {action}",
            args.run_id, args.phase, published.message_id
        );
    }
    Ok(())
}
