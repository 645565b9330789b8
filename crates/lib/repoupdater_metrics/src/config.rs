use anyhow::Result;
use repoupdater_config::AppConfig;
use repoupdater_env_vars::maybe_env;
use url::Url;

#[derive(Debug)]
pub struct Config {
    /// opentelemetry endpoint to send OTLP metrics to. When unset, a no-op
    /// meter provider is used and every instrument becomes a cheap no-op.
    pub endpoint: Option<Url>,
}

impl AppConfig for Config {
    fn from_environment() -> Result<Self> {
        Ok(Self {
            endpoint: maybe_env("OTEL_EXPORTER_OTLP_ENDPOINT")?,
        })
    }
}
