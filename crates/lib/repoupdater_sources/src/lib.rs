//! `Source` variants and the `Sourcer` factory (spec.md §4.B, §4.C): one
//! implementation per external host kind, each enumerating that host's
//! repositories onto a shared `SourceResult` channel.

mod aws_code_commit;
mod bitbucket_cloud;
mod bitbucket_server;
mod changeset;
mod clone_url;
mod exclude;
mod github;
mod gitlab;
mod gitolite;
mod other;
mod phabricator;
mod sigv4;
mod source;
mod sourcer;
mod template;

pub mod errors;

pub use aws_code_commit::AwsCodeCommitSource;
pub use bitbucket_cloud::BitbucketCloudSource;
pub use bitbucket_server::BitbucketServerSource;
pub use changeset::{Changeset, ChangesetError, ChangesetSource, ChangesetSpec, ChangesetState};
pub use errors::SourceError;
pub use github::GitHubSource;
pub use gitlab::GitLabSource;
pub use gitolite::GitoliteSource;
pub use other::OtherSource;
pub use phabricator::PhabricatorSource;
pub use source::{RepoDraft, Source, SourceResult, emit, make_repo};
pub use sourcer::{Decorator, SourcerErrors, build, list_repos_all};
