use anyhow::Result;
use std::time::Duration;
use tracing::warn;

/// Retries `f` with exponential backoff, up to `max_attempts` extra tries
/// past the first (ported from the ambient `retry_async` helper every
/// network-facing crate in this workspace shares).
pub async fn retry_async<T, Fut, F: FnMut() -> Fut>(mut f: F, max_attempts: u32) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    for attempt in 1.. {
        match f().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if attempt > max_attempts {
                    return Err(err);
                } else {
                    let sleep_for = 2u32.pow(attempt);
                    warn!(
                        "got error on attempt {}, will try again after {}s:\n{:?}",
                        attempt, sleep_for, err
                    );
                    tokio::time::sleep(Duration::from_secs(sleep_for as u64)).await;
                }
            }
        }
    }
    unreachable!()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry() {
        let result = retry_async(|| async { Ok::<_, anyhow::Error>(42) }, 3).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let attempts = AtomicU32::new(0);
        let result = retry_async(
            || async {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    anyhow::bail!("not yet")
                } else {
                    Ok(())
                }
            },
            5,
        )
        .await;
        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = retry_async(
            || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("always fails")
            },
            2,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
