use anyhow::{Context as _, Result, anyhow};
use std::{env::VarError, error::Error, str::FromStr};
use tracing::trace;

pub fn env<T>(var: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Error + Send + Sync + 'static,
{
    Ok(maybe_env(var)?.unwrap_or(default))
}

pub fn require_env<T>(var: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Error + Send + Sync + 'static,
{
    maybe_env(var)?.with_context(|| anyhow!("configuration variable {} is missing", var))
}

pub fn maybe_env<T>(var: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Error + Send + Sync + 'static,
{
    match std::env::var(var) {
        Ok(content) => Ok(content
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("failed to parse configuration variable {var}"))?),
        Err(VarError::NotPresent) => {
            trace!("optional configuration variable {} is not set", var);
            Ok(None)
        }
        Err(VarError::NotUnicode(_)) => Err(anyhow!("configuration variable {} is not UTF-8", var)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_used_when_unset() {
        assert_eq!(env("RU_TEST_TOTALLY_UNSET", 7u32).unwrap(), 7);
    }

    #[test]
    fn require_env_missing_errors() {
        assert!(require_env::<u32>("RU_TEST_TOTALLY_UNSET").is_err());
    }
}
