use crate::errors::CliError;
use repoupdater_scheduler::{Scheduler, SourceRepo};
use repoupdater_store::Store;
use repoupdater_syncer::Syncer;
use repoupdater_types::ExternalServiceId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// `serve` (spec.md §6): runs the scheduler's two loops alongside a
/// periodic full sync, feeding each sync's result into
/// [`Scheduler::update_source`] the way spec.md §4.F/§4.G describe F and G
/// as independently wired components — F never calls G directly, it just
/// produces a new repo list per source, which this loop relays.
pub async fn run(
    store: Arc<dyn Store>,
    syncer: Arc<Syncer>,
    scheduler: Arc<Scheduler>,
    sync_interval: Duration,
) -> Result<(), CliError> {
    let cancel = Arc::new(repoupdater_scheduler::Cancel::new());

    let schedule_loop = tokio::spawn({
        let scheduler = scheduler.clone();
        let cancel = cancel.clone();
        async move { scheduler.run_schedule_loop(&cancel).await }
    });
    let update_loop = tokio::spawn({
        let scheduler = scheduler.clone();
        let cancel = cancel.clone();
        async move { scheduler.run_update_loop(&cancel).await }
    });

    let sync_loop = tokio::spawn({
        let store = store.clone();
        let syncer = syncer.clone();
        let scheduler = scheduler.clone();
        let cancel = cancel.clone();
        async move { periodic_sync(store, syncer, scheduler, sync_interval, cancel).await }
    });

    let result = crate::signal::cancellable(async {
        sync_loop.await.map_err(|e| CliError::Transient(e.into()))?
    })
    .await;

    cancel.cancel();
    let _ = schedule_loop.await;
    let _ = update_loop.await;

    result
}

async fn periodic_sync(
    store: Arc<dyn Store>,
    syncer: Arc<Syncer>,
    scheduler: Arc<Scheduler>,
    interval: Duration,
    cancel: Arc<repoupdater_scheduler::Cancel>,
) -> Result<(), CliError> {
    loop {
        if let Err(e) = sync_once(&store, &syncer, &scheduler).await {
            error!(error = %e, "periodic sync failed; will retry next interval");
        }

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// `sync-once` and each tick of `serve`'s periodic loop (spec.md §4.F/§4.G):
/// runs one reconciliation, then relays the resulting per-service repo
/// lists into the scheduler.
pub async fn sync_once(store: &Arc<dyn Store>, syncer: &Arc<Syncer>, scheduler: &Arc<Scheduler>) -> anyhow::Result<()> {
    let outcome = syncer.sync(&[]).await?;
    info!(
        added = outcome.diff.added.len(),
        modified = outcome.diff.modified.len(),
        deleted = outcome.diff.deleted.len(),
        tolerated_errors = outcome.tolerated_errors.len(),
        "sync complete"
    );

    let services = store.list_external_services().await?;
    let repos = store.list_repos().await?;

    let mut by_service: HashMap<ExternalServiceId, Vec<SourceRepo>> =
        services.iter().map(|s| (s.id, Vec::new())).collect();
    for repo in &repos {
        for source in repo.sources.values() {
            if let Some(id) = service_id_for_urn(&services, &source.urn) {
                by_service.entry(id).or_default().push(SourceRepo {
                    name: repo.name.clone(),
                    clone_url: source.clone_url.clone(),
                    enabled: true,
                });
            }
        }
    }

    for service in &services {
        let repos = by_service.remove(&service.id).unwrap_or_default();
        scheduler.update_source(service.id, repos);
    }

    Ok(())
}

fn service_id_for_urn(services: &[repoupdater_store::ExternalServiceRecord], urn: &str) -> Option<ExternalServiceId> {
    services.iter().find(|s| s.urn().to_string() == urn).map(|s| s.id)
}
