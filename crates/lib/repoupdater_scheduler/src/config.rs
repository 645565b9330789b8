use anyhow::Result;
use repoupdater_config::AppConfig;
use repoupdater_env_vars::env;
use std::time::Duration;

/// `minDelay = 45s`, `maxDelay = 8h`, `gitMaxConcurrentClones` (spec.md §6
/// "Scheduler tuning").
#[derive(Debug, Clone)]
pub struct Config {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub git_max_concurrent_clones: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(45),
            max_delay: Duration::from_secs(8 * 3600),
            git_max_concurrent_clones: 5,
        }
    }
}

impl AppConfig for Config {
    fn from_environment() -> Result<Self> {
        let default = Self::default();
        Ok(Self {
            min_delay: Duration::from_secs(env("REPOUPDATER_MIN_RATE_LIMIT_SECONDS", default.min_delay.as_secs())?),
            max_delay: Duration::from_secs(env("REPOUPDATER_MAX_RATE_LIMIT_SECONDS", default.max_delay.as_secs())?),
            git_max_concurrent_clones: env(
                "REPOUPDATER_GIT_MAX_CONCURRENT_CLONES",
                default.git_max_concurrent_clones,
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_tuning() {
        let config = Config::default();
        assert_eq!(config.min_delay, Duration::from_secs(45));
        assert_eq!(config.max_delay, Duration::from_secs(8 * 3600));
    }
}
