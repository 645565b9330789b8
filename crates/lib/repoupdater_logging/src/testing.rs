use std::str::FromStr as _;
use tracing_subscriber::{EnvFilter, filter::Directive};

/// Installs a best-effort subscriber for `#[test]` functions; safe to call
/// more than once per process (later calls are no-ops).
pub fn init() {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(Directive::from_str("repoupdater=debug").unwrap())
                .with_env_var("REPOUPDATER_LOG")
                .from_env_lossy(),
        )
        .with_test_writer()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
