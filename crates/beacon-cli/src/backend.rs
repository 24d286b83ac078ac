use anyhow::Context as _;
use beacon_core::config::BeaconConfig;
use beacon_core::slack::SlackClient;
use beacon_core::store::{FsStore, SlackStore, StateStore};
use clap::ValueEnum;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    /// JSON files under <state-dir>/runs
    Fs,
    /// Bot messages in a Slack storage channel
    Slack,
}

/// Global flags shared by every subcommand.
pub struct Context {
    pub state_dir: PathBuf,
    pub config: Option<PathBuf>,
    pub store: StoreKind,
    pub token: Option<String>,
    pub storage_channel: Option<String>,
    pub slack_api_url: String,
}

impl Context {
    pub fn load_config(&self) -> anyhow::Result<BeaconConfig> {
        let cfg = match &self.config {
            Some(path) => BeaconConfig::load_file(path),
            None => BeaconConfig::load(&self.state_dir),
        };
        cfg.context("failed to load config")
    }

    pub fn slack_client(&self, cfg: &BeaconConfig) -> anyhow::Result<SlackClient> {
        let token = self
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .context("no Slack token: pass --token or set SLACK_ACCESS_TOKEN")?;
        Ok(SlackClient::new(
            token,
            &self.slack_api_url,
            cfg.http_timeout(),
            cfg.retry_policy(),
        )?)
    }

    /// Open the configured record store. The Slack store reuses `client`
    /// when one is already at hand.
    pub fn open_store(
        &self,
        cfg: &BeaconConfig,
        client: Option<&SlackClient>,
    ) -> anyhow::Result<Box<dyn StateStore>> {
        match self.store {
            StoreKind::Fs => Ok(Box::new(FsStore::new(&self.state_dir))),
            StoreKind::Slack => {
                let channel = self
                    .storage_channel
                    .as_deref()
                    .filter(|c| !c.is_empty())
                    .context(
                        "--store slack needs a storage channel: pass --storage-channel or set SLACK_STORAGE_CHANNEL",
                    )?;
                let client = match client {
                    Some(c) => c.clone(),
                    None => self.slack_client(cfg)?,
                };
                let store = SlackStore::connect(client, channel)
                    .with_context(|| format!("cannot open storage channel '{channel}'"))?;
                Ok(Box::new(store))
            }
        }
    }
}
