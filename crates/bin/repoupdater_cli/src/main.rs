mod config;
mod errors;
mod serve;
mod services;
mod signal;

use anyhow::{Context as _, Result};
use clap::Parser;
use config::Config;
use errors::CliError;
use repoupdater_config::AppConfig;
use repoupdater_http::Client as HttpClient;
use repoupdater_metrics::get_meter_provider;
use repoupdater_ratelimit::RateLimitRegistry;
use repoupdater_scheduler::{GitserverClient, HttpGitserverClient, Scheduler, SchedulerMetrics};
use repoupdater_store::{Pool, Store};
use repoupdater_syncer::Syncer;
use repoupdater_types::{ExternalServiceId, ExternalServiceKind};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let guard = repoupdater_logging::init().expect("failed to initialize logging");
    let code = match run().await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = %e, "repo-updater-cli exited with an error");
            e.exit_code()
        }
    };
    drop(guard);
    std::process::exit(code);
}

async fn run() -> Result<(), CliError> {
    let command = CommandLine::parse();
    let config = Config::from_environment().map_err(CliError::Configuration)?;
    command.handle_args(config).await
}

#[derive(Debug, Parser)]
#[command(about = env!("CARGO_PKG_DESCRIPTION"), version, rename_all = "kebab-case")]
enum CommandLine {
    /// One-shot reconciliation across every configured external service
    /// (spec.md §6 `sync-once`)
    SyncOnce {
        /// Restrict the sync to these kinds; every kind if omitted
        #[arg(long = "kind")]
        kinds: Vec<ExternalServiceKind>,
    },

    /// Runs the scheduler's two loops alongside a periodic sync until a
    /// shutdown signal arrives (spec.md §6 `serve`)
    Serve,

    /// Lists configured external services (spec.md §6 `list-services`)
    ListServices,

    /// Appends repo names to an external service's exclude list (spec.md
    /// §6 `exclude`, §4.A `Exclude`)
    Exclude {
        #[arg(long = "service")]
        service: ExternalServiceId,
        #[arg(long = "name", required = true)]
        names: Vec<String>,
    },

    /// Appends repo names to an external service's include list (spec.md
    /// §6 `include`, §4.A `IncludeRepos`)
    Include {
        #[arg(long = "service")]
        service: ExternalServiceId,
        #[arg(long = "name", required = true)]
        names: Vec<String>,
    },
}

impl CommandLine {
    async fn handle_args(self, config: Config) -> Result<(), CliError> {
        let meter_provider = get_meter_provider(&config.metrics).map_err(CliError::Configuration)?;
        let pool = Pool::new(&config.store, &meter_provider)
            .await
            .context("failed to create the database pool")
            .map_err(CliError::Configuration)?;
        let store: Arc<dyn Store> = Arc::new(repoupdater_store::PgStore::new(pool));

        let rate_limits = Arc::new(RateLimitRegistry::new());
        let http = Arc::new(HttpClient::new(rate_limits).map_err(CliError::Configuration)?);

        match self {
            Self::SyncOnce { kinds } => {
                let syncer = Arc::new(Syncer::new(store.clone(), http.clone()));
                let scheduler = build_scheduler(&config, &http, &meter_provider)?;
                signal::cancellable(sync_once(store, syncer, scheduler, kinds)).await
            }
            Self::Serve => {
                let syncer = Arc::new(Syncer::new(store.clone(), http.clone()));
                let scheduler = build_scheduler(&config, &http, &meter_provider)?;
                serve::run(store, syncer, scheduler, config.sync_interval).await
            }
            Self::ListServices => signal::cancellable(async { services::list_services(&store).await }).await,
            Self::Exclude { service, names } => {
                signal::cancellable(async { services::exclude(&store, service, &names).await }).await
            }
            Self::Include { service, names } => {
                signal::cancellable(async { services::include(&store, service, &names).await }).await
            }
        }
    }
}

async fn sync_once(
    store: Arc<dyn Store>,
    syncer: Arc<Syncer>,
    scheduler: Arc<Scheduler>,
    kinds: Vec<ExternalServiceKind>,
) -> Result<(), CliError> {
    let outcome = syncer.sync(&kinds).await.map_err(anyhow::Error::from)?;
    tracing::info!(
        added = outcome.diff.added.len(),
        modified = outcome.diff.modified.len(),
        deleted = outcome.diff.deleted.len(),
        tolerated_errors = outcome.tolerated_errors.len(),
        "sync complete"
    );

    // Relay the post-sync repo lists into the scheduler the same way
    // `serve`'s periodic loop does, so a one-shot `sync-once` also leaves
    // the schedule consistent with what it just wrote to the store.
    serve::sync_once(&store, &syncer, &scheduler).await.map_err(CliError::Transient)?;
    Ok(())
}

fn build_scheduler(
    config: &Config,
    http: &Arc<HttpClient>,
    meter_provider: &repoupdater_metrics::AnyMeterProvider,
) -> Result<Arc<Scheduler>, CliError> {
    let gitserver: Arc<dyn GitserverClient> =
        Arc::new(HttpGitserverClient::new(http.clone(), config.gitserver_url.clone()));
    let metrics = SchedulerMetrics::new(meter_provider);
    Ok(Arc::new(Scheduler::new(&config.scheduler, gitserver, metrics)))
}
