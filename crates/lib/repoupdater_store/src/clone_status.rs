use chrono::{DateTime, Utc};
use repoupdater_types::RepoId;

/// Local clone state for a repo, tracked separately from the catalogue
/// record itself (spec.md §4.H: the scheduler's "new repo" queue drains
/// repos that have never been cloned, independent of how often their
/// metadata changes upstream).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloneStatus {
    pub repo_id: RepoId,
    pub cloned: bool,
    pub updated_at: DateTime<Utc>,
}
