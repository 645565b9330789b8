//! `ChangesetSource` (spec.md §4.B): the orthogonal capability a `Source`
//! may additionally implement when its host has a real pull/merge-request
//! API. Only [`crate::GitHubSource`] and [`crate::GitLabSource`] implement
//! it in this codebase — Bitbucket, Gitolite, Phabricator, AWS CodeCommit,
//! and `OtherSource` do not (spec.md §4.B: "not all Sources need implement
//! it").

use crate::errors::SourceError;
use async_trait::async_trait;

/// What to open a changeset (pull/merge request) with.
#[derive(Debug, Clone)]
pub struct ChangesetSpec {
    pub repo_external_id: String,
    pub title: String,
    pub body: String,
    pub base_ref: String,
    pub head_ref: String,
}

/// A pull/merge request as the host reports it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Changeset {
    pub external_id: String,
    pub title: String,
    pub body: String,
    pub base_ref: String,
    pub head_ref: String,
    pub state: ChangesetState,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangesetState {
    Open,
    Closed,
    Merged,
}

/// Failure taxonomy specific to changeset operations (spec.md §7, §9:
/// "`AlreadyExists` — changeset creation race; caller recovers by look-up").
#[derive(Debug, thiserror::Error)]
pub enum ChangesetError {
    #[error(transparent)]
    Source(#[from] SourceError),

    /// A create raced with an existing open changeset for the same
    /// source/target refs. The caller looks the existing one up via
    /// `LoadChangesets` and treats it as already created.
    #[error("changeset already exists for {base_ref}..{head_ref}")]
    AlreadyExists { base_ref: String, head_ref: String },
}

#[async_trait]
pub trait ChangesetSource: Send + Sync {
    async fn create_changeset(&self, spec: &ChangesetSpec) -> Result<Changeset, ChangesetError>;

    /// Loads the current state of each changeset in `external_ids`, in the
    /// same order; a missing changeset is omitted rather than erroring.
    async fn load_changesets(&self, external_ids: &[String]) -> Result<Vec<Changeset>, ChangesetError>;

    async fn update_changeset(&self, external_id: &str, spec: &ChangesetSpec) -> Result<Changeset, ChangesetError>;

    async fn close_changeset(&self, external_id: &str) -> Result<Changeset, ChangesetError>;

    async fn reopen_changeset(&self, external_id: &str) -> Result<Changeset, ChangesetError>;
}
