use crate::backend::Context;
use crate::output::print_json;
use beacon_core::config::WarnLevel;
use clap::Subcommand;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Print the effective configuration (file values over defaults)
    Show,

    /// Validate the config for common mistakes
    Validate,
}

pub fn run(ctx: &Context, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show => show(ctx, json),
        ConfigSubcommand::Validate => validate(ctx, json),
    }
}

fn show(ctx: &Context, json: bool) -> anyhow::Result<()> {
    let config = ctx.load_config()?;
    if json {
        print_json(&config)
    } else {
        print!("{}", serde_yaml::to_string(&config)?);
        Ok(())
    }
}

fn validate(ctx: &Context, json: bool) -> anyhow::Result<()> {
    let config = ctx.load_config()?;
    let warnings = config.validate();

    if json {
        print_json(&serde_json::json!({ "warnings": warnings }))?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}
