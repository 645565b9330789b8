//! The Syncer (spec.md §4.F): one reconciliation cycle from External
//! Services through Sources, the diff engine, and back into the Store.

use chrono::Utc;
use repoupdater_diff::{Diff, new_diff};
use repoupdater_externalservice::ExternalService;
use repoupdater_http::Client as HttpClient;
use repoupdater_ratelimit::sync_rate_limiters;
use repoupdater_sources::{Decorator, Source, SourceError, SourceResult, SourcerErrors, build, list_repos_all};
use repoupdater_store::{Store, StoreError};
use repoupdater_types::{ExternalServiceKind, Repo};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

const DRAIN_CHANNEL_CAPACITY: usize = 256;

/// Concatenates every tolerated per-service error with `"N errors
/// occurred:"` formatting (spec.md §4.F: "the surface error concatenates
/// all accumulated errors").
#[derive(Debug)]
pub struct MultiError(pub Vec<SourceError>);

impl std::fmt::Display for MultiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} errors occurred:", self.0.len())?;
        for e in &self.0 {
            writeln!(f, "  * {e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Per-service construction failure; spec.md §4.F step 2 fails fast
    /// rather than tolerating these like per-batch sourcing errors.
    #[error(transparent)]
    Sourcer(#[from] SourcerErrors),

    #[error("{urn}: cancelled")]
    Cancelled { urn: String },
}

/// The result of one `sync`/`sync_subset` call: the diff that was applied,
/// plus any transient per-service errors tolerated while draining sources
/// (spec.md §7: "transient errors alone log a warning and return
/// success").
#[derive(Debug)]
pub struct SyncOutcome {
    pub diff: Diff,
    pub tolerated_errors: Vec<SourceError>,
}

pub struct Syncer {
    store: Arc<dyn Store>,
    http: Arc<HttpClient>,
    decorators: Vec<Decorator>,
}

impl Syncer {
    pub fn new(store: Arc<dyn Store>, http: Arc<HttpClient>) -> Self {
        Self { store, http, decorators: Vec::new() }
    }

    pub fn with_decorators(mut self, decorators: Vec<Decorator>) -> Self {
        self.decorators = decorators;
        self
    }

    /// `Sync(ctx, kinds…)` (spec.md §4.F): reconciles every non-deleted
    /// external service whose kind is in `kinds` (every kind if empty)
    /// against the Store.
    pub async fn sync(&self, kinds: &[ExternalServiceKind]) -> Result<SyncOutcome, SyncError> {
        let services = self.services_of_kinds(kinds).await?;
        let sources = self.build_sources(&services)?;
        let (sourced, tolerated_errors) = drain(&sources).await?;

        let stored = self.store.list_repos_including_deleted().await?;
        let diff = new_diff(sourced, stored);
        self.apply(&diff).await?;

        Ok(SyncOutcome { diff, tolerated_errors })
    }

    /// `SyncSubset(ctx, repos…)` (spec.md §4.F): re-sources only the hosts
    /// that own `repos` and confines the diff to their external
    /// identities, skipping the full `Store.ListRepos` scan — used for
    /// on-demand refresh of a handful of repos rather than a full cycle.
    pub async fn sync_subset(&self, repos: &[Repo]) -> Result<SyncOutcome, SyncError> {
        let kinds: Vec<ExternalServiceKind> =
            repos.iter().map(|r| r.external_repo.service_type).collect();
        let services = self.services_of_kinds(&kinds).await?;
        let sources = self.build_sources(&services)?;
        let (sourced, tolerated_errors) = drain(&sources).await?;

        let identities: HashSet<_> = repos.iter().map(|r| r.external_repo.clone()).collect();
        let sourced: Vec<Repo> = sourced.into_iter().filter(|r| identities.contains(&r.external_repo)).collect();

        let diff = new_diff(sourced, repos.to_vec());
        self.apply(&diff).await?;

        Ok(SyncOutcome { diff, tolerated_errors })
    }

    /// Lists live external services of `kinds`, refreshing the shared
    /// rate-limit registry from the *full* service list first (spec.md
    /// §4.H): a host's effective limit can only be computed by looking at
    /// every service on it, not just the ones a kind-filtered sync cares
    /// about.
    async fn services_of_kinds(&self, kinds: &[ExternalServiceKind]) -> Result<Vec<ExternalService>, StoreError> {
        let records = self.store.list_external_services().await?;
        let all_services: Vec<ExternalService> = records.into_iter().map(|r| r.service).collect();
        sync_rate_limiters(self.http.rate_limits(), &all_services);
        Ok(all_services
            .into_iter()
            .filter(|s| kinds.is_empty() || kinds.contains(&s.kind))
            .collect())
    }

    /// Builds one `Source` per service, failing fast on the first
    /// construction error (spec.md §4.F step 2), unlike the per-batch
    /// sourcing errors tolerated while draining.
    fn build_sources(&self, services: &[ExternalService]) -> Result<Vec<Arc<dyn Source>>, SyncError> {
        let (sources, errors) = build(services, self.http.clone(), &self.decorators);
        match errors {
            Some(errors) => Err(errors.into()),
            None => Ok(sources),
        }
    }

    /// Stamps timestamps and applies the diff (spec.md §4.F step 7):
    /// `createdAt` for Added, `updatedAt` for Added and Modified,
    /// `deletedAt` for Deleted. Deleted repos go through `delete_repos`
    /// rather than `upsert_repos`, since an upsert on this Store always
    /// clears `deleted_at` — soft-deletion needs its own call.
    async fn apply(&self, diff: &Diff) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut upserts = Vec::with_capacity(diff.added.len() + diff.modified.len());
        for repo in diff.added.iter().chain(diff.modified.iter()) {
            let mut repo = repo.clone();
            if repo.created_at.is_none() {
                repo.created_at = Some(now);
            }
            repo.updated_at = Some(now);
            upserts.push(repo);
        }
        if !upserts.is_empty() {
            self.store.upsert_repos(upserts).await?;
        }
        if !diff.deleted.is_empty() {
            let ids: Vec<_> = diff.deleted.iter().map(|r| r.id).collect();
            self.store.delete_repos(&ids).await?;
        }
        Ok(())
    }
}

/// Drains every source concurrently (spec.md §4.C aggregation policy),
/// classifying each per-repo/per-batch error per the taxonomy in spec.md
/// §7: `NotFound` is logged and dropped, `Cancelled` aborts immediately,
/// everything else (`TransientHost`, `RateLimitExhausted`, a stray
/// `Config`) is tolerated and accumulated for the caller to inspect.
async fn drain(sources: &[Arc<dyn Source>]) -> Result<(Vec<Repo>, Vec<SourceError>), SyncError> {
    let (tx, mut rx) = mpsc::channel::<SourceResult>(DRAIN_CHANNEL_CAPACITY);
    let handle = {
        let sources = sources.to_vec();
        tokio::spawn(async move { list_repos_all(&sources, tx).await })
    };

    let mut sourced = Vec::new();
    let mut tolerated = Vec::new();
    while let Some(result) = rx.recv().await {
        match result.outcome {
            Ok(repo) => sourced.push(repo),
            Err(SourceError::Cancelled { urn }) => return Err(SyncError::Cancelled { urn }),
            Err(SourceError::NotFound { urn, what }) => {
                tracing::info!(urn, what, "explicit include not found, skipping");
            }
            Err(e) => {
                tracing::warn!(error = %e, "tolerating source error during sync");
                tolerated.push(e);
            }
        }
    }
    let _ = handle.await;
    Ok((sourced, tolerated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use repoupdater_externalservice::ExternalService;
    use repoupdater_ratelimit::RateLimitRegistry;
    use repoupdater_store::{MemoryStore, UpsertExternalService};
    use repoupdater_types::ExternalServiceId;

    fn http_client() -> Arc<HttpClient> {
        Arc::new(HttpClient::new(Arc::new(RateLimitRegistry::new())).unwrap())
    }

    async fn other_service(store: &MemoryStore, repos_json: &str) -> ExternalService {
        let record = store
            .upsert_external_service(UpsertExternalService {
                id: ExternalServiceId::UNPERSISTED,
                kind: ExternalServiceKind::Other,
                display_name: "test".to_string(),
                config: format!(r#"{{"repos": {repos_json}}}"#),
            })
            .await
            .unwrap();
        record.service
    }

    #[tokio::test]
    async fn first_sync_adds_every_configured_repo() {
        let store = Arc::new(MemoryStore::new());
        other_service(&store, r#"[{"url": "https://example.com/a/b.git"}]"#).await;

        let syncer = Syncer::new(store.clone(), http_client());
        let outcome = syncer.sync(&[]).await.unwrap();

        assert_eq!(outcome.diff.added.len(), 1);
        assert!(outcome.diff.modified.is_empty());
        assert!(outcome.tolerated_errors.is_empty());
        assert_eq!(store.list_repos().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_sync_with_same_config_is_unmodified() {
        let store = Arc::new(MemoryStore::new());
        other_service(&store, r#"[{"url": "https://example.com/a/b.git"}]"#).await;
        let syncer = Syncer::new(store.clone(), http_client());

        syncer.sync(&[]).await.unwrap();
        let outcome = syncer.sync(&[]).await.unwrap();

        assert!(outcome.diff.added.is_empty());
        assert_eq!(outcome.diff.unmodified.len(), 1);
    }

    #[tokio::test]
    async fn removing_a_repo_from_config_soft_deletes_it() {
        let store = Arc::new(MemoryStore::new());
        let service = other_service(&store, r#"[{"url": "https://example.com/a/b.git"}]"#).await;
        let syncer = Syncer::new(store.clone(), http_client());
        syncer.sync(&[]).await.unwrap();

        store
            .upsert_external_service(UpsertExternalService {
                id: service.id,
                kind: service.kind,
                display_name: service.display_name.clone(),
                config: r#"{"repos": []}"#.to_string(),
            })
            .await
            .unwrap();

        let outcome = syncer.sync(&[]).await.unwrap();
        assert_eq!(outcome.diff.deleted.len(), 1);
        assert!(store.list_repos().await.unwrap().is_empty());
        assert_eq!(store.list_repos_including_deleted().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sync_filters_by_kind() {
        let store = Arc::new(MemoryStore::new());
        other_service(&store, r#"[{"url": "https://example.com/a/b.git"}]"#).await;
        let syncer = Syncer::new(store.clone(), http_client());

        let outcome = syncer.sync(&[ExternalServiceKind::GitHub]).await.unwrap();
        assert!(outcome.diff.is_empty());
    }

    #[tokio::test]
    async fn sync_subset_confines_diff_to_given_repos() {
        let store = Arc::new(MemoryStore::new());
        other_service(&store, r#"[{"url": "https://example.com/a/b.git"}, {"url": "https://example.com/c/d.git"}]"#)
            .await;
        let syncer = Syncer::new(store.clone(), http_client());
        syncer.sync(&[]).await.unwrap();

        let all = store.list_repos().await.unwrap();
        let subset = vec![all.iter().find(|r| r.name.as_str().contains("a/b")).unwrap().clone()];

        let outcome = syncer.sync_subset(&subset).await.unwrap();
        assert_eq!(outcome.diff.unmodified.len(), 1);
        assert!(outcome.diff.added.is_empty());
    }

    #[tokio::test]
    async fn config_construction_failure_fails_the_whole_sync() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_external_service(UpsertExternalService {
                id: ExternalServiceId::UNPERSISTED,
                kind: ExternalServiceKind::GitHub,
                display_name: "broken".to_string(),
                config: "{not json".to_string(),
            })
            .await
            .unwrap();

        let syncer = Syncer::new(store, http_client());
        let err = syncer.sync(&[]).await.unwrap_err();
        assert!(matches!(err, SyncError::Sourcer(_)));
    }

    #[test]
    fn multi_error_formats_with_count_prefix() {
        let err = MultiError(vec![SourceError::NotFound { urn: "extsvc:other:1".into(), what: "x".into() }]);
        assert!(err.to_string().starts_with("1 errors occurred:"));
    }
}
