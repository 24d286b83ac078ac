use crate::backend::Context;
use crate::output::{print_json, print_table, truncate};
use anyhow::Context as _;
use beacon_core::engine::MergeEngine;
use clap::Args;

#[derive(Args, Debug)]
pub struct ShowArgs {
    #[arg(long, env = "CIRCLE_WORKFLOW_ID")]
    pub run_id: String,
}

pub fn run(ctx: &Context, args: ShowArgs, json: bool) -> anyhow::Result<()> {
    let cfg = ctx.load_config()?;
    let store = ctx.open_store(&cfg, None)?;
    let state = MergeEngine::from_config(store.as_ref(), &cfg)
        .load(&args.run_id)
        .with_context(|| format!("failed to load run '{}'", args.run_id))?
        .with_context(|| format!("no record for run '{}'", args.run_id))?;

    if json {
        return print_json(&state);
    }

    println!("Run:      {}", state.run_id);
    println!("Message:  {}", state.message_id.as_deref().unwrap_or("-"));
    println!("Revision: {}", state.revision);
    println!("Updated:  {}", state.updated_at.to_rfc3339());
    println!();

    if state.phases.is_empty() {
        println!("No phases recorded.");
        return Ok(());
    }

    let rows = state
        .phases
        .iter()
        .map(|p| {
            vec![
                p.name.clone(),
                p.color.to_string(),
                truncate(&p.status, 40),
                p.steps.len().to_string(),
                truncate(p.steps.last().map(String::as_str).unwrap_or(""), 40),
                if p.is_final { "yes" } else { "" }.to_string(),
            ]
        })
        .collect();
    print_table(&["PHASE", "COLOR", "STATUS", "STEPS", "LAST STEP", "FINAL"], rows);
    Ok(())
}
