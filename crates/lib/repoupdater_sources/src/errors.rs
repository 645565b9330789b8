use chrono::{DateTime, Utc};

/// The failure taxonomy a `Source` can report for a single repository or
/// batch (spec.md §7).
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error(transparent)]
    Config(#[from] ConfigErrorWithUrn),

    #[error("{urn}: transient error talking to host: {source}")]
    TransientHost {
        urn: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{urn}: rate limit exhausted, remaining={remaining}, resets at {reset_at}")]
    RateLimitExhausted { urn: String, remaining: i64, reset_at: DateTime<Utc> },

    #[error("{urn}: {what} not found")]
    NotFound { urn: String, what: String },

    #[error("{urn}: cancelled")]
    Cancelled { urn: String },
}

/// `repoupdater_externalservice::InvalidConfig` paired with the owning
/// service's URN, so a config failure surfaced through `SourceError` always
/// names the service it came from (spec.md §7: "every error contains the
/// External-Service URN").
#[derive(Debug, thiserror::Error)]
#[error("{urn}: {source}")]
pub struct ConfigErrorWithUrn {
    urn: String,
    #[source]
    source: repoupdater_externalservice::InvalidConfig,
}

impl ConfigErrorWithUrn {
    pub fn new(urn: String, source: repoupdater_externalservice::InvalidConfig) -> Self {
        Self { urn, source }
    }
}

impl SourceError {
    /// Wraps a config parse/schema failure with the owning service's URN
    /// (spec.md §7: "every error contains the External-Service URN").
    pub fn config(urn: String, source: repoupdater_externalservice::InvalidConfig) -> Self {
        Self::Config(ConfigErrorWithUrn::new(urn, source))
    }
}
