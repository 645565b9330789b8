use crate::errors::CliError;
use std::future::Future;

/// Races `fut` against SIGINT/SIGTERM (spec.md §6: exit code `3`, "aborted
/// by signal"). Every subcommand runs through this so a Ctrl-C during a
/// long `sync-once` or `serve` reports the distinct exit code rather than
/// looking like a transient failure.
pub async fn cancellable<F, T>(fut: F) -> Result<T, CliError>
where
    F: Future<Output = Result<T, CliError>>,
{
    tokio::select! {
        result = fut => result,
        _ = wait_for_shutdown_signal() => Err(CliError::Aborted),
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
