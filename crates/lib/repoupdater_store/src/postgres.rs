use crate::{
    ConflictError, ExternalServiceRecord, Pool, Store, StoreError, UpsertExternalService,
};
use async_trait::async_trait;
use repoupdater_externalservice::ExternalService;
use repoupdater_types::{ExternalRepoSpec, ExternalServiceId, Repo, RepoId, RepoName, SourceInfo};
use sqlx::Row;
use sqlx::postgres::PgRow;
use std::collections::BTreeMap;

/// The production `Store`, backed by Postgres (spec.md §4.D).
///
/// Queries are built at runtime with the query builder rather than the
/// `query!` macro family: this crate has no live database to check them
/// against at build time, so reaching for compile-time verified queries
/// here would trade a real guarantee for one we can't actually keep.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

fn external_service_from_row(row: &PgRow) -> Result<ExternalServiceRecord, StoreError> {
    let kind: String = row.try_get("kind")?;
    Ok(ExternalServiceRecord {
        service: ExternalService {
            id: ExternalServiceId(row.try_get("id")?),
            kind: kind
                .parse()
                .map_err(|_| StoreError::NotFound(format!("external service kind {kind:?}")))?,
            display_name: row.try_get("display_name")?,
            config: row.try_get("config")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
        },
        last_sync_at: row.try_get("last_sync_at")?,
    })
}

fn repo_from_row(row: &PgRow) -> Result<Repo, StoreError> {
    let service_type: String = row.try_get("service_type")?;
    let sources: serde_json::Value = row.try_get("sources")?;
    let sources: BTreeMap<String, SourceInfo> =
        serde_json::from_value(sources).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    Ok(Repo {
        id: RepoId(row.try_get("id")?),
        name: row
            .try_get::<String, _>("name")?
            .parse()
            .map_err(|e: repoupdater_types::InvalidRepoName| sqlx::Error::Decode(Box::new(e)))?,
        external_repo: ExternalRepoSpec::new(
            service_type
                .parse()
                .map_err(|_| StoreError::NotFound(format!("external service kind {service_type:?}")))?,
            row.try_get::<String, _>("service_id")?,
            row.try_get::<String, _>("external_id")?,
        ),
        uri: row.try_get("uri")?,
        description: row.try_get("description")?,
        language: row.try_get("language")?,
        fork: row.try_get("fork")?,
        archived: row.try_get("archived")?,
        private: row.try_get("private")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
        sources,
        metadata: row.try_get("metadata")?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn list_external_services(&self) -> Result<Vec<ExternalServiceRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, kind, display_name, config, created_at, updated_at, deleted_at, last_sync_at
             FROM external_services
             WHERE deleted_at IS NULL
             ORDER BY id",
        )
        .fetch_all(&mut *self.pool.get_async().await?)
        .await?;
        rows.iter().map(external_service_from_row).collect()
    }

    async fn get_external_service(
        &self,
        id: ExternalServiceId,
    ) -> Result<Option<ExternalServiceRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT id, kind, display_name, config, created_at, updated_at, deleted_at, last_sync_at
             FROM external_services
             WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&mut *self.pool.get_async().await?)
        .await?;
        row.as_ref().map(external_service_from_row).transpose()
    }

    async fn upsert_external_service(
        &self,
        svc: UpsertExternalService,
    ) -> Result<ExternalServiceRecord, StoreError> {
        let kind = svc.kind.to_string();
        let row = if svc.id.is_unpersisted() {
            sqlx::query(
                "INSERT INTO external_services (kind, display_name, config, created_at, updated_at)
                 VALUES ($1, $2, $3, NOW(), NOW())
                 RETURNING id, kind, display_name, config, created_at, updated_at, deleted_at, last_sync_at",
            )
            .bind(&kind)
            .bind(&svc.display_name)
            .bind(&svc.config)
            .fetch_one(&mut *self.pool.get_async().await?)
            .await?
        } else {
            sqlx::query(
                "UPDATE external_services
                 SET kind = $2, display_name = $3, config = $4, updated_at = NOW()
                 WHERE id = $1 AND deleted_at IS NULL
                 RETURNING id, kind, display_name, config, created_at, updated_at, deleted_at, last_sync_at",
            )
            .bind(svc.id.0)
            .bind(&kind)
            .bind(&svc.display_name)
            .bind(&svc.config)
            .fetch_optional(&mut *self.pool.get_async().await?)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("external service {}", svc.id)))?
        };
        external_service_from_row(&row)
    }

    async fn delete_external_service(&self, id: ExternalServiceId) -> Result<(), StoreError> {
        sqlx::query("UPDATE external_services SET deleted_at = NOW() WHERE id = $1")
            .bind(id.0)
            .execute(&mut *self.pool.get_async().await?)
            .await?;
        Ok(())
    }

    async fn list_repos(&self) -> Result<Vec<Repo>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, service_type, service_id, external_id, uri, description, language,
                    fork, archived, private, created_at, updated_at, deleted_at, sources, metadata
             FROM repos
             WHERE deleted_at IS NULL
             ORDER BY id",
        )
        .fetch_all(&mut *self.pool.get_async().await?)
        .await?;
        rows.iter().map(repo_from_row).collect()
    }

    async fn list_repos_including_deleted(&self) -> Result<Vec<Repo>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, service_type, service_id, external_id, uri, description, language,
                    fork, archived, private, created_at, updated_at, deleted_at, sources, metadata
             FROM repos
             ORDER BY id",
        )
        .fetch_all(&mut *self.pool.get_async().await?)
        .await?;
        rows.iter().map(repo_from_row).collect()
    }

    async fn get_repo(&self, id: RepoId) -> Result<Option<Repo>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, service_type, service_id, external_id, uri, description, language,
                    fork, archived, private, created_at, updated_at, deleted_at, sources, metadata
             FROM repos
             WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&mut *self.pool.get_async().await?)
        .await?;
        row.as_ref().map(repo_from_row).transpose()
    }

    async fn get_repo_by_name(&self, name: &RepoName) -> Result<Option<Repo>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, service_type, service_id, external_id, uri, description, language,
                    fork, archived, private, created_at, updated_at, deleted_at, sources, metadata
             FROM repos
             WHERE lower(name) = lower($1) AND deleted_at IS NULL",
        )
        .bind(name.as_str())
        .fetch_optional(&mut *self.pool.get_async().await?)
        .await?;
        row.as_ref().map(repo_from_row).transpose()
    }

    async fn upsert_repos(&self, repos: Vec<Repo>) -> Result<Vec<Repo>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut stored = Vec::with_capacity(repos.len());
        for repo in repos {
            let sources = serde_json::to_value(&repo.sources).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
            let existing_by_name = sqlx::query(
                "SELECT service_type, service_id, external_id FROM repos
                 WHERE lower(name) = lower($1) AND deleted_at IS NULL
                   AND NOT (service_type = $2 AND service_id = $3 AND external_id = $4)",
            )
            .bind(repo.name.as_str())
            .bind(repo.external_repo.service_type.to_string())
            .bind(&repo.external_repo.service_id)
            .bind(&repo.external_repo.id)
            .fetch_optional(&mut *tx)
            .await?;
            if let Some(row) = existing_by_name {
                let existing_type: String = row.try_get("service_type")?;
                return Err(ConflictError {
                    existing: format!(
                        "{}:{}:{}",
                        existing_type,
                        row.try_get::<String, _>("service_id")?,
                        row.try_get::<String, _>("external_id")?
                    ),
                    attempted: format!(
                        "{}:{}:{}",
                        repo.external_repo.service_type, repo.external_repo.service_id, repo.external_repo.id
                    ),
                }
                .into());
            }

            let row = sqlx::query(
                "INSERT INTO repos (
                     name, service_type, service_id, external_id, uri, description, language,
                     fork, archived, private, sources, metadata, created_at, updated_at
                 ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW(), NOW())
                 ON CONFLICT (service_type, service_id, external_id) DO UPDATE SET
                     name = $1,
                     uri = $5,
                     description = $6,
                     language = $7,
                     fork = $8,
                     archived = $9,
                     private = $10,
                     sources = $11,
                     metadata = $12,
                     deleted_at = NULL,
                     updated_at = NOW()
                 RETURNING id, name, service_type, service_id, external_id, uri, description,
                           language, fork, archived, private, created_at, updated_at, deleted_at,
                           sources, metadata",
            )
            .bind(repo.name.as_str())
            .bind(repo.external_repo.service_type.to_string())
            .bind(&repo.external_repo.service_id)
            .bind(&repo.external_repo.id)
            .bind(&repo.uri)
            .bind(&repo.description)
            .bind(&repo.language)
            .bind(repo.fork)
            .bind(repo.archived)
            .bind(repo.private)
            .bind(sources)
            .bind(&repo.metadata)
            .fetch_one(&mut *tx)
            .await?;
            stored.push(repo_from_row(&row)?);
        }
        tx.commit().await?;
        Ok(stored)
    }

    async fn delete_repos(&self, ids: &[RepoId]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let ids: Vec<i32> = ids.iter().map(|id| id.0).collect();
        sqlx::query("UPDATE repos SET deleted_at = NOW() WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&mut *self.pool.get_async().await?)
            .await?;
        Ok(())
    }

    async fn set_cloned_repos(&self, ids: &[RepoId], cloned: bool) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let ids: Vec<i32> = ids.iter().map(|id| id.0).collect();
        sqlx::query(
            "INSERT INTO gitserver_repos (repo_id, cloned, updated_at)
             SELECT id, $2, NOW() FROM unnest($1) AS id
             ON CONFLICT (repo_id) DO UPDATE SET cloned = $2, updated_at = NOW()",
        )
        .bind(&ids)
        .bind(cloned)
        .execute(&mut *self.pool.get_async().await?)
        .await?;
        Ok(())
    }

    async fn count_not_cloned_repos(&self) -> Result<i64, StoreError> {
        let row = sqlx::query(
            "SELECT count(*) AS count FROM repos
             LEFT JOIN gitserver_repos ON gitserver_repos.repo_id = repos.id
             WHERE repos.deleted_at IS NULL AND coalesce(gitserver_repos.cloned, false) = false",
        )
        .fetch_one(&mut *self.pool.get_async().await?)
        .await?;
        Ok(row.try_get("count")?)
    }
}
