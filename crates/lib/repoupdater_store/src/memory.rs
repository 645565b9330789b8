use crate::{ConflictError, ExternalServiceRecord, Store, StoreError, UpsertExternalService};
use async_trait::async_trait;
use chrono::Utc;
use repoupdater_externalservice::ExternalService;
use repoupdater_types::{ExternalServiceId, Repo, RepoId, RepoName};
use std::collections::HashMap;
use std::sync::Mutex;

/// An in-process `Store` used in tests across this workspace, so components
/// that depend on `Store` can be exercised without a live Postgres (spec.md
/// §4.D). Keeps the same uniqueness and soft-delete semantics as `PgStore`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    external_services: HashMap<ExternalServiceId, ExternalServiceRecord>,
    next_external_service_id: i32,
    repos: HashMap<RepoId, Repo>,
    cloned: HashMap<RepoId, bool>,
    next_repo_id: i32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_external_services(&self) -> Result<Vec<ExternalServiceRecord>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut services: Vec<_> = inner
            .external_services
            .values()
            .filter(|svc| !svc.is_deleted())
            .cloned()
            .collect();
        services.sort_by_key(|svc| svc.id);
        Ok(services)
    }

    async fn get_external_service(
        &self,
        id: ExternalServiceId,
    ) -> Result<Option<ExternalServiceRecord>, StoreError> {
        Ok(self.inner.lock().unwrap().external_services.get(&id).cloned())
    }

    async fn upsert_external_service(
        &self,
        svc: UpsertExternalService,
    ) -> Result<ExternalServiceRecord, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        let id = if svc.id.is_unpersisted() {
            inner.next_external_service_id += 1;
            ExternalServiceId(inner.next_external_service_id)
        } else {
            svc.id
        };
        let created_at = inner
            .external_services
            .get(&id)
            .map(|existing| existing.created_at)
            .unwrap_or(now);
        let record = ExternalServiceRecord {
            service: ExternalService {
                id,
                kind: svc.kind,
                display_name: svc.display_name,
                config: svc.config,
                created_at,
                updated_at: now,
                deleted_at: None,
            },
            last_sync_at: inner
                .external_services
                .get(&id)
                .and_then(|existing| existing.last_sync_at),
        };
        inner.external_services.insert(id, record.clone());
        Ok(record)
    }

    async fn delete_external_service(&self, id: ExternalServiceId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(svc) = inner.external_services.get_mut(&id) {
            svc.deleted_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn list_repos(&self) -> Result<Vec<Repo>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut repos: Vec<_> = inner.repos.values().filter(|r| !r.is_deleted()).cloned().collect();
        repos.sort_by_key(|r| r.id);
        Ok(repos)
    }

    async fn list_repos_including_deleted(&self) -> Result<Vec<Repo>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut repos: Vec<_> = inner.repos.values().cloned().collect();
        repos.sort_by_key(|r| r.id);
        Ok(repos)
    }

    async fn get_repo(&self, id: RepoId) -> Result<Option<Repo>, StoreError> {
        Ok(self.inner.lock().unwrap().repos.get(&id).cloned())
    }

    async fn get_repo_by_name(&self, name: &RepoName) -> Result<Option<Repo>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .repos
            .values()
            .find(|r| !r.is_deleted() && r.name.eq_ignore_case(name))
            .cloned())
    }

    async fn upsert_repos(&self, repos: Vec<Repo>) -> Result<Vec<Repo>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let mut stored = Vec::with_capacity(repos.len());
        for mut repo in repos {
            if let Some(conflicting) = inner.repos.values().find(|existing| {
                !existing.is_deleted()
                    && existing.name.eq_ignore_case(&repo.name)
                    && existing.external_repo != repo.external_repo
            }) {
                return Err(ConflictError {
                    existing: conflicting.external_repo.id.clone(),
                    attempted: repo.external_repo.id.clone(),
                }
                .into());
            }

            let existing_id = inner
                .repos
                .values()
                .find(|existing| existing.external_repo == repo.external_repo)
                .map(|existing| existing.id);

            let now = Utc::now();
            let id = match existing_id {
                Some(id) => id,
                None => {
                    inner.next_repo_id += 1;
                    RepoId(inner.next_repo_id)
                }
            };
            repo.id = id;
            repo.created_at = existing_id
                .and_then(|id| inner.repos.get(&id))
                .and_then(|existing| existing.created_at)
                .or(repo.created_at)
                .or(Some(now));
            repo.updated_at = Some(now);
            repo.deleted_at = None;
            inner.repos.insert(id, repo.clone());
            stored.push(repo);
        }
        Ok(stored)
    }

    async fn delete_repos(&self, ids: &[RepoId]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        for id in ids {
            if let Some(repo) = inner.repos.get_mut(id) {
                repo.deleted_at = Some(now);
            }
        }
        Ok(())
    }

    async fn set_cloned_repos(&self, ids: &[RepoId], cloned: bool) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        for id in ids {
            inner.cloned.insert(*id, cloned);
        }
        Ok(())
    }

    async fn count_not_cloned_repos(&self) -> Result<i64, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .repos
            .values()
            .filter(|r| !r.is_deleted())
            .filter(|r| !inner.cloned.get(&r.id).copied().unwrap_or(false))
            .count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repoupdater_types::{ExternalRepoSpec, ExternalServiceKind, RepoName};
    use std::collections::BTreeMap;

    fn repo(name: &str, external_id: &str) -> Repo {
        Repo {
            id: RepoId::UNPERSISTED,
            name: name.parse::<RepoName>().unwrap(),
            external_repo: ExternalRepoSpec::new(
                ExternalServiceKind::GitHub,
                "https://github.com/",
                external_id,
            ),
            uri: None,
            description: None,
            language: None,
            fork: false,
            archived: false,
            private: false,
            created_at: None,
            updated_at: None,
            deleted_at: None,
            sources: BTreeMap::new(),
            metadata: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn upsert_assigns_ids_and_is_idempotent() {
        let store = MemoryStore::new();
        let stored = store.upsert_repos(vec![repo("github.com/a/b", "1")]).await.unwrap();
        assert!(!stored[0].id.is_unpersisted());

        let restored = store
            .upsert_repos(vec![repo("github.com/a/b", "1")])
            .await
            .unwrap();
        assert_eq!(stored[0].id, restored[0].id);
    }

    #[tokio::test]
    async fn upsert_rejects_name_collision_with_different_identity() {
        let store = MemoryStore::new();
        store.upsert_repos(vec![repo("github.com/a/b", "1")]).await.unwrap();

        let err = store
            .upsert_repos(vec![repo("github.com/a/b", "2")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn delete_is_soft_and_excludes_from_listing() {
        let store = MemoryStore::new();
        let stored = store.upsert_repos(vec![repo("github.com/a/b", "1")]).await.unwrap();
        store.delete_repos(&[stored[0].id]).await.unwrap();

        assert!(store.list_repos().await.unwrap().is_empty());
        assert!(store.get_repo(stored[0].id).await.unwrap().unwrap().is_deleted());
    }

    #[tokio::test]
    async fn cloned_state_is_tracked_independently_of_repo_updates() {
        let store = MemoryStore::new();
        let stored = store.upsert_repos(vec![repo("github.com/a/b", "1")]).await.unwrap();
        assert_eq!(store.count_not_cloned_repos().await.unwrap(), 1);

        store.set_cloned_repos(&[stored[0].id], true).await.unwrap();
        assert_eq!(store.count_not_cloned_repos().await.unwrap(), 0);

        store.upsert_repos(vec![repo("github.com/a/b", "1")]).await.unwrap();
        assert_eq!(store.count_not_cloned_repos().await.unwrap(), 0);
    }
}
