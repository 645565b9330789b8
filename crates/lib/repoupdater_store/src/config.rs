use anyhow::Result;
use repoupdater_config::AppConfig;
use repoupdater_env_vars::{env, require_env};

#[derive(Debug)]
pub struct Config {
    pub database_url: String,
    pub max_pool_size: u32,
    pub min_pool_idle: u32,
}

impl AppConfig for Config {
    fn from_environment() -> Result<Self> {
        Ok(Self {
            database_url: require_env("REPOUPDATER_DATABASE_URL")?,
            max_pool_size: env("REPOUPDATER_MAX_POOL_SIZE", 30u32)?,
            min_pool_idle: env("REPOUPDATER_MIN_POOL_IDLE", 5u32)?,
        })
    }

    #[cfg(any(feature = "testing", test))]
    fn test_config() -> Result<Self> {
        let mut config = Self::from_environment()?;
        config.max_pool_size = 8;
        config.min_pool_idle = 2;
        Ok(config)
    }
}
