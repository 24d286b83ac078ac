mod backend;
mod cmd;
mod output;

use backend::{Context, StoreKind};
use clap::{Parser, Subcommand};
use cmd::{
    config::ConfigSubcommand, notify::NotifyArgs, render::RenderArgs, show::ShowArgs,
    sweep::SweepArgs,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "beacon",
    about = "Keep one Slack status message per CI pipeline run up to date",
    version,
    propagate_version = true
)]
struct Cli {
    /// Directory holding config.yaml and filesystem run records
    #[arg(long, global = true, env = "BEACON_STATE_DIR", default_value = ".beacon")]
    state_dir: PathBuf,

    /// Config file (default: <state-dir>/config.yaml)
    #[arg(long, global = true, env = "BEACON_CONFIG")]
    config: Option<PathBuf>,

    /// Where run records live
    #[arg(long, global = true, value_enum, env = "BEACON_STORE", default_value = "fs")]
    store: StoreKind,

    /// Slack bot token
    #[arg(long, global = true, env = "SLACK_ACCESS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Slack channel name holding run records (with --store slack)
    #[arg(long, global = true, env = "SLACK_STORAGE_CHANNEL")]
    storage_channel: Option<String>,

    /// Slack Web API base URL
    #[arg(
        long,
        global = true,
        env = "SLACK_API_URL",
        default_value = beacon_core::slack::DEFAULT_API_URL
    )]
    slack_api_url: String,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a phase event and create or amend the run's Slack message
    Notify(NotifyArgs),

    /// Delete expired and duplicate run records
    Sweep(SweepArgs),

    /// Print the stored state of a run
    Show(ShowArgs),

    /// Print the Slack attachments for a run without posting them
    Render(RenderArgs),

    /// Inspect and validate the configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Notify(_) | Commands::Sweep(_) => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    // Logs go to stderr so --json output on stdout stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let ctx = Context {
        state_dir: cli.state_dir,
        config: cli.config,
        store: cli.store,
        token: cli.token,
        storage_channel: cli.storage_channel,
        slack_api_url: cli.slack_api_url,
    };

    let result = match cli.command {
        Commands::Notify(args) => cmd::notify::run(&ctx, args, cli.json),
        Commands::Sweep(args) => cmd::sweep::run(&ctx, args, cli.json),
        Commands::Show(args) => cmd::show::run(&ctx, args, cli.json),
        Commands::Render(args) => cmd::render::run(&ctx, args),
        Commands::Config { subcommand } => cmd::config::run(&ctx, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
