use crate::errors::CliError;
use repoupdater_store::Store;
use repoupdater_types::ExternalServiceId;
use std::sync::Arc;

/// `list-services`: prints every configured external service, one per
/// line, with enough detail to pick a `--service` id for `exclude`/
/// `include`.
pub async fn list_services(store: &Arc<dyn Store>) -> Result<(), CliError> {
    let services = store.list_external_services().await.map_err(anyhow::Error::from)?;
    for record in &services {
        println!(
            "{id}\t{urn}\t{display_name}{deleted}",
            id = record.id.0,
            urn = record.urn(),
            display_name = record.display_name,
            deleted = if record.is_deleted() { "\t(deleted)" } else { "" },
        );
    }
    Ok(())
}

/// `exclude --service ID --name NAME...`: appends each `name` to the
/// service's `exclude` list (spec.md §4.A `Exclude`), persisting the
/// rewritten config blob.
pub async fn exclude(store: &Arc<dyn Store>, service_id: ExternalServiceId, names: &[String]) -> Result<(), CliError> {
    edit_config(store, service_id, names, |service, repos| service.exclude(repos)).await
}

/// `include --service ID --name NAME...`: the `IncludeRepos` counterpart.
pub async fn include(store: &Arc<dyn Store>, service_id: ExternalServiceId, names: &[String]) -> Result<(), CliError> {
    edit_config(store, service_id, names, |service, repos| {
        let names: Vec<String> = repos.iter().filter_map(|(name, _)| name.clone()).collect();
        service.include_repos(&names)
    })
    .await
}

async fn edit_config(
    store: &Arc<dyn Store>,
    service_id: ExternalServiceId,
    names: &[String],
    edit: impl FnOnce(
        &mut repoupdater_externalservice::ExternalService,
        &[(Option<String>, Option<String>)],
    ) -> Result<(), repoupdater_externalservice::InvalidConfig>,
) -> Result<(), CliError> {
    let mut record = store
        .get_external_service(service_id)
        .await
        .map_err(anyhow::Error::from)?
        .ok_or_else(|| CliError::Configuration(anyhow::anyhow!("no external service with id {service_id}")))?;

    let repos: Vec<(Option<String>, Option<String>)> = names.iter().map(|n| (Some(n.clone()), None)).collect();
    edit(&mut record.service, &repos).map_err(|e| CliError::Configuration(e.into()))?;

    store
        .upsert_external_service(repoupdater_store::UpsertExternalService {
            id: record.service.id,
            kind: record.service.kind,
            display_name: record.service.display_name.clone(),
            config: record.service.config.clone(),
        })
        .await
        .map_err(anyhow::Error::from)?;

    Ok(())
}
