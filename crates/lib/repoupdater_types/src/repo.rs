use crate::{ExternalServiceId, ExternalServiceKind, RepoId, RepoName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// The host-side identity triple a Repo is keyed on (spec.md §3):
/// `(serviceType, serviceID, id)`. `serviceID` is the normalised base URL of
/// the host; `id` is the host's own stable identifier for the repository
/// (e.g. a GitHub GraphQL node id).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExternalRepoSpec {
    pub service_type: ExternalServiceKind,
    pub service_id: String,
    pub id: String,
}

impl ExternalRepoSpec {
    pub fn new(
        service_type: ExternalServiceKind,
        service_id: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            service_type,
            service_id: service_id.into(),
            id: id.into(),
        }
    }
}

/// One entry in `Repo.sources`: which external service this repo came from,
/// keyed by that service's [`crate::Urn`], and the clone URL that service
/// yielded for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub urn: String,
    pub clone_url: Url,
}

/// A repository known to the catalogue (spec.md §3).
///
/// `sources` is never empty for a live repo (spec.md §3 invariant); once it
/// becomes empty the repo transitions to deleted — callers are responsible
/// for upholding this, it is not an invariant the type itself can enforce
/// (a `Repo` is a plain data record, same split the teacher uses between
/// `Repository` data and `RepositoryStatsUpdater` behavior).
#[derive(Debug, Clone, PartialEq)]
pub struct Repo {
    pub id: RepoId,
    pub name: RepoName,
    pub external_repo: ExternalRepoSpec,
    pub uri: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
    pub fork: bool,
    pub archived: bool,
    pub private: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub sources: BTreeMap<String, SourceInfo>,
    pub metadata: serde_json::Value,
}

impl Repo {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// A deterministic, total order over candidate "authoritative" records
    /// used to `pick` between duplicates with the same external identity
    /// (spec.md §4.E): `(id, name, externalRepo, sorted source keys)`.
    pub fn pick_key(&self) -> (RepoId, &RepoName, &ExternalRepoSpec, Vec<&String>) {
        (
            self.id,
            &self.name,
            &self.external_repo,
            self.sources.keys().collect(),
        )
    }
}
