use super::HeaderArgs;
use crate::backend::Context;
use crate::output::print_json;
use anyhow::Context as _;
use beacon_core::engine::MergeEngine;
use beacon_core::render::Renderer;
use clap::Args;

#[derive(Args, Debug)]
pub struct RenderArgs {
    #[arg(long, env = "CIRCLE_WORKFLOW_ID")]
    pub run_id: String,

    #[command(flatten)]
    pub header: HeaderArgs,
}

/// Always prints JSON: the attachments array is the only useful form.
pub fn run(ctx: &Context, args: RenderArgs) -> anyhow::Result<()> {
    let cfg = ctx.load_config()?;
    let store = ctx.open_store(&cfg, None)?;
    let state = MergeEngine::from_config(store.as_ref(), &cfg)
        .load(&args.run_id)
        .with_context(|| format!("failed to load run '{}'", args.run_id))?
        .with_context(|| format!("no record for run '{}'", args.run_id))?;

    let payload = Renderer::from_config(&cfg).render(&state, &args.header.to_header(&cfg));
    print_json(&serde_json::json!({
        "text": payload.fallback,
        "attachments": payload.to_slack_attachments(),
    }))
}
