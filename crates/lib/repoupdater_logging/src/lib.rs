#[cfg(feature = "testing")]
pub mod testing;

use std::{env, str::FromStr as _};
use tracing_subscriber::{EnvFilter, filter::Directive, prelude::*};

/// Keeps the sentry client alive for the lifetime of the process. Dropping it
/// flushes any buffered events.
pub struct Guard {
    #[allow(dead_code)]
    sentry_guard: Option<sentry::ClientInitGuard>,
}

/// Initializes the global `tracing` subscriber, optionally forwarding events to
/// Sentry when `SENTRY_DSN` is set. Call this once, at the top of `main`.
pub fn init() -> anyhow::Result<Guard> {
    let log_formatter = {
        let log_format = env::var("REPOUPDATER_LOG_FORMAT").unwrap_or_default();

        if log_format == "json" {
            tracing_subscriber::fmt::layer().json().boxed()
        } else {
            tracing_subscriber::fmt::layer().boxed()
        }
    };

    let tracing_registry = tracing_subscriber::registry().with(log_formatter).with(
        EnvFilter::builder()
            .with_default_directive(Directive::from_str("repoupdater=info")?)
            .with_env_var("REPOUPDATER_LOG")
            .from_env_lossy(),
    );

    let sentry_guard = if let Ok(sentry_dsn) = env::var("SENTRY_DSN") {
        tracing::subscriber::set_global_default(
            tracing_registry.with(sentry_tracing::layer()),
        )?;

        Some(sentry::init((
            sentry_dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                attach_stacktrace: true,
                ..Default::default()
            },
        )))
    } else {
        tracing::subscriber::set_global_default(tracing_registry)?;
        None
    };

    Ok(Guard { sentry_guard })
}

mod sentry_tracing {
    // `sentry` ships its tracing integration behind the `tracing` feature; we
    // re-export the layer constructor here so `init` doesn't need to know
    // which sentry version module path it lives under.
    pub use sentry::integrations::tracing::layer;
}
