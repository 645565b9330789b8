mod clone_status;
mod config;
mod errors;
mod external_service;
mod memory;
mod metrics;
mod pool;
mod postgres;

pub use clone_status::CloneStatus;
pub use config::Config;
pub use errors::{ConflictError, PoolError, StoreError};
pub use external_service::{ExternalServiceRecord, UpsertExternalService};
pub use memory::MemoryStore;
pub use pool::Pool;
pub use postgres::PgStore;

use async_trait::async_trait;
use repoupdater_types::{ExternalServiceId, Repo, RepoId, RepoName};

/// The persistence contract every component above the wire (Sourcer,
/// Syncer, Scheduler) is written against (spec.md §4.D). `PgStore` is the
/// production implementation; `MemoryStore` is an in-process test double
/// with the same semantics used throughout this workspace's tests.
#[async_trait]
pub trait Store: Send + Sync {
    async fn list_external_services(&self) -> Result<Vec<ExternalServiceRecord>, StoreError>;

    async fn get_external_service(
        &self,
        id: ExternalServiceId,
    ) -> Result<Option<ExternalServiceRecord>, StoreError>;

    async fn upsert_external_service(
        &self,
        svc: UpsertExternalService,
    ) -> Result<ExternalServiceRecord, StoreError>;

    async fn delete_external_service(&self, id: ExternalServiceId) -> Result<(), StoreError>;

    async fn list_repos(&self) -> Result<Vec<Repo>, StoreError>;

    /// Like [`Store::list_repos`] but includes soft-deleted rows — the
    /// Syncer's diff input needs these so a repo that comes back under the
    /// same external identity is resurrected rather than re-inserted
    /// (spec.md §4.F step 5).
    async fn list_repos_including_deleted(&self) -> Result<Vec<Repo>, StoreError>;

    async fn get_repo(&self, id: RepoId) -> Result<Option<Repo>, StoreError>;

    async fn get_repo_by_name(&self, name: &RepoName) -> Result<Option<Repo>, StoreError>;

    /// Inserts or updates each repo, keyed on `(external_repo.service_type,
    /// external_repo.service_id, external_repo.id)` (spec.md §4.E). Returns
    /// the stored rows in the same order, with `id` filled in.
    async fn upsert_repos(&self, repos: Vec<Repo>) -> Result<Vec<Repo>, StoreError>;

    /// Soft-deletes the given repos by stamping `deleted_at` (spec.md §3).
    async fn delete_repos(&self, ids: &[RepoId]) -> Result<(), StoreError>;

    async fn set_cloned_repos(&self, ids: &[RepoId], cloned: bool) -> Result<(), StoreError>;

    async fn count_not_cloned_repos(&self) -> Result<i64, StoreError>;
}
