pub mod config;
pub mod notify;
pub mod render;
pub mod show;
pub mod sweep;

use beacon_core::config::BeaconConfig;
use beacon_core::render::Header;
use clap::Args;

/// Pipeline metadata for the message header. Defaults match what CircleCI
/// leaves unset.
#[derive(Args, Debug, Clone)]
pub struct HeaderArgs {
    /// Pipeline title (default: `title` from config)
    #[arg(long)]
    pub title: Option<String>,

    #[arg(long, env = "CIRCLE_BRANCH", default_value = "unknown")]
    pub branch: String,

    #[arg(long, env = "CIRCLE_USERNAME", default_value = "unknown")]
    pub user: String,

    /// Link target for "View Pipeline"
    #[arg(long, env = "CIRCLE_BUILD_URL", default_value = "#")]
    pub build_url: String,

    #[arg(long, env = "CIRCLE_PROJECT_REPONAME", default_value = "repo")]
    pub repo: String,

    #[arg(long, env = "CIRCLE_BUILD_NUM", default_value = "0")]
    pub build_num: String,
}

impl HeaderArgs {
    pub fn to_header(&self, cfg: &BeaconConfig) -> Header {
        Header {
            title: self.title.clone().unwrap_or_else(|| cfg.title.clone()),
            branch: self.branch.clone(),
            user: self.user.clone(),
            build_url: self.build_url.clone(),
            repo: self.repo.clone(),
            build_num: self.build_num.clone(),
        }
    }
}
