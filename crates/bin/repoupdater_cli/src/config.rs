use anyhow::Result;
use repoupdater_config::AppConfig;
use repoupdater_env_vars::{env, require_env};
use url::Url;

/// Top-level process configuration: every sub-crate's own `Config` plus the
/// handful of settings that belong to the CLI itself (spec.md §6's
/// "mirror-fetch RPC" base URL and the periodic-sync cadence `serve` uses).
#[derive(Debug)]
pub struct Config {
    pub store: repoupdater_store::Config,
    pub metrics: repoupdater_metrics::Config,
    pub scheduler: repoupdater_scheduler::Config,
    pub gitserver_url: Url,
    pub sync_interval: std::time::Duration,
}

impl AppConfig for Config {
    fn from_environment() -> Result<Self> {
        Ok(Self {
            store: repoupdater_store::Config::from_environment()?,
            metrics: repoupdater_metrics::Config::from_environment()?,
            scheduler: repoupdater_scheduler::Config::from_environment()?,
            gitserver_url: require_env("REPOUPDATER_GITSERVER_URL")?,
            sync_interval: std::time::Duration::from_secs(env("REPOUPDATER_SYNC_INTERVAL_SECONDS", 3600u64)?),
        })
    }
}
