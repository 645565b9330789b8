mod ids;
mod kind;
mod repo;
mod repo_name;
mod urn;

pub use ids::{ExternalServiceId, RepoId};
pub use kind::{ExternalServiceKind, InvalidExternalServiceKind};
pub use repo::{ExternalRepoSpec, Repo, SourceInfo};
pub use repo_name::{InvalidRepoName, RepoName};
pub use urn::{InvalidUrn, Urn};
