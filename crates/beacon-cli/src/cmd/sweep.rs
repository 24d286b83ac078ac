use crate::backend::Context;
use crate::output::{print_json, print_table};
use anyhow::Context as _;
use beacon_core::retention::{self, DeleteReason, SweepReport};
use chrono::Utc;
use clap::Args;

#[derive(Args, Debug)]
pub struct SweepArgs {
    /// List what would be deleted without deleting anything
    #[arg(long)]
    pub dry_run: bool,

    /// Override `retention_hours` from config
    #[arg(long)]
    pub retention_hours: Option<u64>,
}

pub fn run(ctx: &Context, args: SweepArgs, json: bool) -> anyhow::Result<()> {
    let mut cfg = ctx.load_config()?;
    if let Some(hours) = args.retention_hours {
        cfg.retention_hours = hours;
    }
    let store = ctx.open_store(&cfg, None)?;
    let now = Utc::now();

    if args.dry_run {
        let entries = store.scan().context("failed to scan run records")?;
        let doomed = retention::plan(&entries, cfg.retention(), now);
        if json {
            let items: Vec<_> = doomed
                .iter()
                .map(|(i, reason)| {
                    serde_json::json!({
                        "key": entries[*i].handle.key,
                        "run_id": entries[*i].run_id(),
                        "reason": reason,
                    })
                })
                .collect();
            return print_json(&serde_json::json!({ "dry_run": true, "would_delete": items }));
        }
        if doomed.is_empty() {
            println!("Nothing to delete ({} records scanned).", entries.len());
            return Ok(());
        }
        let rows = doomed
            .iter()
            .map(|(i, reason)| {
                vec![
                    entries[*i].handle.key.clone(),
                    entries[*i].run_id().unwrap_or("-").to_string(),
                    reason_label(*reason).to_string(),
                    entries[*i].written_at.to_rfc3339(),
                ]
            })
            .collect();
        print_table(&["KEY", "RUN", "REASON", "WRITTEN"], rows);
        return Ok(());
    }

    let report = retention::sweep(store.as_ref(), cfg.retention(), now)
        .context("retention sweep failed")?;
    if json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }
    Ok(())
}

fn reason_label(reason: DeleteReason) -> &'static str {
    match reason {
        DeleteReason::Expired => "expired",
        DeleteReason::Duplicate => "duplicate",
    }
}

fn print_report(report: &SweepReport) {
    println!(
        "Scanned {} records: {} deleted, {} failed, {} kept ({} malformed).",
        report.scanned,
        report.deleted(),
        report.failed(),
        report.kept,
        report.malformed_skipped,
    );
    for o in report.outcomes.iter().filter(|o| o.error.is_some()) {
        println!(
            "  failed {} {}: {}",
            reason_label(o.reason),
            o.key,
            o.error.as_deref().unwrap_or_default()
        );
    }
}
