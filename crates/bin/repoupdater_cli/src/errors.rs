/// Exit codes from spec.md §6: `0` success, `1` transient error, `2`
/// configuration error, `3` aborted by signal.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Configuration(#[source] anyhow::Error),

    #[error(transparent)]
    Transient(#[from] anyhow::Error),

    #[error("aborted by signal")]
    Aborted,
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 2,
            Self::Transient(_) => 1,
            Self::Aborted => 3,
        }
    }
}
