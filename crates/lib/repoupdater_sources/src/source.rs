//! The common `Source` capability (spec.md §4.B) every host-kind
//! implementation and the multi-source aggregator satisfy.

use crate::clone_url::{self, AuthOptions};
use crate::errors::SourceError;
use async_trait::async_trait;
use repoupdater_externalservice::{ExternalService, GitUrlType};
use repoupdater_types::{ExternalRepoSpec, Repo, RepoName, SourceInfo, Urn};
use std::collections::BTreeMap;
use tokio::sync::mpsc;

/// One yielded record from `Source::list_repos`: either a repo built from
/// one host record, or a per-batch error, always tagged with the URN of the
/// service it came from (spec.md §4.B, §7: "every error contains the
/// External-Service URN").
pub struct SourceResult {
    pub source: Urn,
    pub outcome: Result<Repo, SourceError>,
}

impl SourceResult {
    pub fn ok(source: Urn, repo: Repo) -> Self {
        Self { source, outcome: Ok(repo) }
    }

    pub fn err(source: Urn, error: SourceError) -> Self {
        Self { source, outcome: Err(error) }
    }
}

/// Sends `result` on `tx`, dropping it silently if the receiver is gone —
/// matches the spec's channel contract where the caller may stop draining
/// early (spec.md §5, `onSourced` hook asking to stop).
pub async fn emit(tx: &mpsc::Sender<SourceResult>, result: SourceResult) {
    let _ = tx.send(result).await;
}

/// `ListRepos(ctx, out chan<- SourceResult)` (spec.md §4.B). Implementations
/// enumerate their host and send one [`SourceResult`] per repository or
/// batch error, then return; the caller closes the channel.
#[async_trait]
pub trait Source: Send + Sync {
    /// The services this Source represents — almost always exactly one,
    /// except the multi-source aggregator (spec.md §4.B).
    fn external_services(&self) -> Vec<ExternalService>;

    async fn list_repos(&self, tx: mpsc::Sender<SourceResult>);
}

/// The host-agnostic fields `makeRepo` needs from a single raw host record
/// (spec.md §4.B). Each `Source` maps its own wire format into this shape
/// before calling [`make_repo`].
pub struct RepoDraft {
    pub name: RepoName,
    pub external_id: String,
    pub clone_url_https: String,
    pub ssh_url: Option<String>,
    pub uri: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
    pub fork: bool,
    pub archived: bool,
    pub private: bool,
    pub metadata: serde_json::Value,
}

/// Builds a [`Repo`] from one [`RepoDraft`], filling in the external
/// identity triple, the `sources` map entry for this service, and the
/// authenticated clone URL (spec.md §4.B `makeRepo`).
pub fn make_repo(
    service: &ExternalService,
    service_base_url: &str,
    git_url_type: GitUrlType,
    token: Option<&str>,
    username: Option<&str>,
    app_password: Option<&str>,
    draft: RepoDraft,
) -> Result<Repo, SourceError> {
    let urn = service.urn();
    let opts = AuthOptions { kind: service.kind, git_url_type, token, username, app_password };
    let clone_url = clone_url::authenticated_remote_url(&opts, draft.ssh_url.as_deref(), &draft.clone_url_https);
    let clone_url = url::Url::parse(&clone_url).map_err(|source| {
        SourceError::TransientHost { urn: urn.to_string(), source: anyhow::anyhow!("invalid clone url: {source}") }
    })?;

    let mut sources = BTreeMap::new();
    sources.insert(urn.to_string(), SourceInfo { urn: urn.to_string(), clone_url });

    Ok(Repo {
        id: repoupdater_types::RepoId::UNPERSISTED,
        name: draft.name,
        external_repo: ExternalRepoSpec::new(service.kind, service_base_url, draft.external_id),
        uri: draft.uri,
        description: draft.description,
        language: draft.language,
        fork: draft.fork,
        archived: draft.archived,
        private: draft.private,
        created_at: None,
        updated_at: None,
        deleted_at: None,
        sources,
        metadata: draft.metadata,
    })
}
