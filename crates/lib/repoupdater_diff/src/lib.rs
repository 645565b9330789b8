//! The diff engine (spec.md §4.E): a pure function comparing the repos a
//! `Sourcer` just enumerated against the repos the `Store` already knows
//! about, producing four disjoint buckets for the Syncer to apply.
//!
//! Matching is two-level — external identity first, case-insensitive name
//! as a fallback — so that a rename under a stable external id and a
//! "swap" of two names both collapse to `Modified` entries rather than
//! spurious `Deleted`+`Added` pairs (see `new_diff` below).

use repoupdater_types::Repo;
use std::collections::{BTreeMap, HashMap, HashSet};

/// The outcome of one `new_diff` call. Each repo appears in exactly one
/// bucket. Records here are not yet timestamped — the caller (the Syncer)
/// stamps `createdAt`/`updatedAt`/`deletedAt` at apply time (spec.md §4.F
/// step 7), since timestamping is an effect and this function is not.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Diff {
    pub added: Vec<Repo>,
    pub modified: Vec<Repo>,
    pub unmodified: Vec<Repo>,
    pub deleted: Vec<Repo>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// The deterministic total order used to pick which of several sourced
/// duplicates (spec.md §4.E: "duplicates within the sourced list") keeps
/// the authoritative non-source fields: `(id, name, externalRepo, sorted
/// source keys)`, delegated to [`Repo::pick_key`].
pub fn pick<'a>(a: &'a Repo, b: &'a Repo) -> &'a Repo {
    if a.pick_key() <= b.pick_key() { a } else { b }
}

/// Computes the diff between `sourced` (authoritative, just enumerated by
/// the `Sourcer`) and `stored` (the Store's current view, including
/// soft-deleted rows so a repo that comes back under the same external id
/// can be resurrected rather than duplicated).
pub fn new_diff(sourced: Vec<Repo>, stored: Vec<Repo>) -> Diff {
    let collapsed = collapse_sourced(sourced);

    let stored_by_external: HashMap<_, _> =
        stored.iter().map(|r| (r.external_repo.clone(), r.id)).collect();
    let stored_by_name: HashMap<_, _> = stored
        .iter()
        .filter(|r| !r.is_deleted())
        .map(|r| (r.name.to_lowercase_key(), r.id))
        .collect();
    let stored_by_id: HashMap<_, _> = stored.into_iter().map(|r| (r.id, r)).collect();

    let mut consumed = HashSet::new();
    let mut unmatched_sourced = Vec::new();
    let mut diff = Diff::default();

    // Pass 1: primary match on external identity. Order-independent — a
    // plain map lookup, not a scan — so this pass alone settles swaps: both
    // sides of a name exchange match their own external id and are
    // classified Modified, never Delete+Add.
    for repo in collapsed {
        match stored_by_external.get(&repo.external_repo) {
            Some(&stored_id) => {
                consumed.insert(stored_id);
                classify(&stored_by_id[&stored_id], &repo, &mut diff);
            }
            None => unmatched_sourced.push(repo),
        }
    }

    // Pass 2: case-insensitive name fallback, restricted to stored repos
    // pass 1 left untouched. `stored.name` is unique among live repos, so
    // this lookup is a plain map hit too.
    for repo in unmatched_sourced {
        let fallback = stored_by_name
            .get(&repo.name.to_lowercase_key())
            .copied()
            .filter(|id| !consumed.contains(id));
        match fallback {
            Some(stored_id) => {
                consumed.insert(stored_id);
                classify(&stored_by_id[&stored_id], &repo, &mut diff);
            }
            None => diff.added.push(repo),
        }
    }

    // Anything stored but never matched (and not already soft-deleted) is
    // gone from every source that used to report it.
    for (id, repo) in &stored_by_id {
        if !consumed.contains(id) && !repo.is_deleted() {
            diff.deleted.push(repo.clone());
        }
    }

    diff.added.sort_by(|a, b| a.external_repo.cmp(&b.external_repo));
    diff.modified.sort_by_key(|r| r.id);
    diff.unmodified.sort_by_key(|r| r.id);
    diff.deleted.sort_by_key(|r| r.id);
    diff
}

/// Merges a matched pair and files the result as `Modified` or
/// `Unmodified`. A stored repo coming back from soft-deletion is always
/// `Modified`, even if every other field is byte-identical, since
/// `deletedAt` itself must be cleared.
fn classify(stored: &Repo, sourced: &Repo, diff: &mut Diff) {
    let merged = merge(stored, sourced);
    if stored.is_deleted() || !content_eq(&merged, stored) {
        diff.modified.push(merged);
    } else {
        diff.unmodified.push(merged);
    }
}

/// `Update(newer)` (spec.md §4.E): the stored record's identity (`id`,
/// `createdAt`) is kept, scalar fields are taken from the newer sourced
/// side, and `sources` is unioned rather than replaced — `cloneURL` for a
/// key present on both sides comes from the sourced entry.
fn merge(stored: &Repo, sourced: &Repo) -> Repo {
    let mut sources = stored.sources.clone();
    for (urn, info) in &sourced.sources {
        sources.insert(urn.clone(), info.clone());
    }
    Repo {
        id: stored.id,
        name: sourced.name.clone(),
        external_repo: sourced.external_repo.clone(),
        uri: sourced.uri.clone(),
        description: sourced.description.clone(),
        language: sourced.language.clone(),
        fork: sourced.fork,
        archived: sourced.archived,
        private: sourced.private,
        created_at: stored.created_at,
        updated_at: stored.updated_at,
        deleted_at: None,
        sources,
        metadata: sourced.metadata.clone(),
    }
}

/// Structural equality ignoring the three timestamp fields, which are the
/// Syncer's concern to stamp, not this function's to compare.
fn content_eq(a: &Repo, b: &Repo) -> bool {
    a.name == b.name
        && a.external_repo == b.external_repo
        && a.uri == b.uri
        && a.description == b.description
        && a.language == b.language
        && a.fork == b.fork
        && a.archived == b.archived
        && a.private == b.private
        && a.sources == b.sources
        && a.metadata == b.metadata
}

/// Collapses sourced duplicates sharing one external identity (e.g. two
/// configured services that both enumerate the same physical repo) into a
/// single record: `pick` chooses which candidate's scalar fields survive,
/// but every candidate's `sources` entries are unioned in regardless.
fn collapse_sourced(sourced: Vec<Repo>) -> Vec<Repo> {
    let mut groups: HashMap<repoupdater_types::ExternalRepoSpec, Vec<Repo>> = HashMap::new();
    for repo in sourced {
        groups.entry(repo.external_repo.clone()).or_default().push(repo);
    }
    groups.into_values().map(collapse_group).collect()
}

fn collapse_group(group: Vec<Repo>) -> Repo {
    let mut sources = BTreeMap::new();
    for repo in &group {
        for (urn, info) in &repo.sources {
            sources.insert(urn.clone(), info.clone());
        }
    }
    let winner = group
        .iter()
        .fold(None, |acc, candidate| match acc {
            None => Some(candidate),
            Some(current) => Some(pick(current, candidate)),
        })
        .expect("a group is never built from an empty Vec")
        .clone();
    Repo { sources, ..winner }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use repoupdater_types::{ExternalRepoSpec, ExternalServiceKind, RepoId, RepoName, SourceInfo};
    use std::collections::BTreeMap;

    fn spec(id: &str) -> ExternalRepoSpec {
        ExternalRepoSpec::new(ExternalServiceKind::GitHub, "https://github.com/", id)
    }

    fn source(urn: &str, clone_url: &str) -> (String, SourceInfo) {
        (
            urn.to_string(),
            SourceInfo { urn: urn.to_string(), clone_url: clone_url.parse().unwrap() },
        )
    }

    fn repo(id: i32, name: &str, external_id: &str, sources: &[(&str, &str)]) -> Repo {
        Repo {
            id: RepoId(id),
            name: name.parse::<RepoName>().unwrap(),
            external_repo: spec(external_id),
            uri: None,
            description: None,
            language: None,
            fork: false,
            archived: false,
            private: false,
            created_at: None,
            updated_at: None,
            deleted_at: None,
            sources: sources.iter().map(|(urn, url)| source(urn, url)).collect(),
            metadata: serde_json::Value::Null,
        }
    }

    fn deleted(mut r: Repo) -> Repo {
        r.deleted_at = Some(chrono::Utc::now());
        r
    }

    #[test]
    fn unseen_sourced_repo_is_added() {
        let sourced = vec![repo(0, "github.com/a/b", "1", &[("svc:1", "https://github.com/a/b.git")])];
        let diff = new_diff(sourced, vec![]);
        assert_eq!(diff.added.len(), 1);
        assert!(diff.modified.is_empty());
        assert!(diff.unmodified.is_empty());
        assert!(diff.deleted.is_empty());
    }

    #[test]
    fn identical_repo_is_unmodified() {
        let stored = repo(1, "github.com/a/b", "1", &[("svc:1", "https://github.com/a/b.git")]);
        let sourced = repo(0, "github.com/a/b", "1", &[("svc:1", "https://github.com/a/b.git")]);
        let diff = new_diff(vec![sourced], vec![stored]);
        assert_eq!(diff.unmodified.len(), 1);
        assert!(diff.modified.is_empty());
    }

    #[test]
    fn changed_description_is_modified_and_keeps_stored_id() {
        let mut stored = repo(1, "github.com/a/b", "1", &[("svc:1", "https://github.com/a/b.git")]);
        stored.description = Some("old".into());
        let mut sourced = repo(0, "github.com/a/b", "1", &[("svc:1", "https://github.com/a/b.git")]);
        sourced.description = Some("new".into());

        let diff = new_diff(vec![sourced], vec![stored]);
        assert_eq!(diff.modified.len(), 1);
        assert_eq!(diff.modified[0].id, RepoId(1));
        assert_eq!(diff.modified[0].description.as_deref(), Some("new"));
    }

    #[test]
    fn stored_repo_absent_from_sourcing_is_deleted() {
        let stored = repo(1, "github.com/a/b", "1", &[("svc:1", "https://github.com/a/b.git")]);
        let diff = new_diff(vec![], vec![stored]);
        assert_eq!(diff.deleted.len(), 1);
        assert_eq!(diff.deleted[0].id, RepoId(1));
    }

    #[test]
    fn already_deleted_stored_repo_not_resourced_is_left_alone() {
        let stored = deleted(repo(1, "github.com/a/b", "1", &[]));
        let diff = new_diff(vec![], vec![stored]);
        assert!(diff.deleted.is_empty(), "must not re-emit an already-deleted repo");
    }

    #[test]
    fn resourcing_a_deleted_repo_resurrects_it_as_modified() {
        let stored = deleted(repo(1, "github.com/a/b", "1", &[("svc:1", "https://github.com/a/b.git")]));
        let sourced = repo(0, "github.com/a/b", "1", &[("svc:1", "https://github.com/a/b.git")]);
        let diff = new_diff(vec![sourced], vec![stored]);
        assert_eq!(diff.modified.len(), 1);
        assert!(diff.modified[0].deleted_at.is_none());
    }

    #[test]
    fn rename_under_stable_external_id_is_modified_not_delete_and_add() {
        let stored = repo(1, "github.com/a/old-name", "1", &[("svc:1", "https://github.com/a/old-name.git")]);
        let sourced = repo(0, "github.com/a/new-name", "1", &[("svc:1", "https://github.com/a/new-name.git")]);
        let diff = new_diff(vec![sourced], vec![stored]);
        assert_eq!(diff.modified.len(), 1);
        assert!(diff.added.is_empty());
        assert!(diff.deleted.is_empty());
        assert_eq!(diff.modified[0].name.as_str(), "github.com/a/new-name");
    }

    #[test]
    fn swap_of_two_names_is_two_modified_never_delete_and_add() {
        let stored_a = repo(1, "github.com/a/x", "1", &[("svc:1", "https://github.com/a/x.git")]);
        let stored_b = repo(2, "github.com/a/y", "2", &[("svc:1", "https://github.com/a/y.git")]);
        // same external ids, names now exchanged
        let sourced_a = repo(0, "github.com/a/y", "1", &[("svc:1", "https://github.com/a/y.git")]);
        let sourced_b = repo(0, "github.com/a/x", "2", &[("svc:1", "https://github.com/a/x.git")]);

        for (sourced, stored) in [
            (vec![sourced_a.clone(), sourced_b.clone()], vec![stored_a.clone(), stored_b.clone()]),
            (vec![sourced_b.clone(), sourced_a.clone()], vec![stored_b.clone(), stored_a.clone()]),
        ] {
            let diff = new_diff(sourced, stored);
            assert_eq!(diff.modified.len(), 2, "swap must yield two Modified entries");
            assert!(diff.added.is_empty());
            assert!(diff.deleted.is_empty());
        }
    }

    #[test]
    fn name_fallback_matches_when_sourced_side_has_a_fresh_external_id_but_same_name() {
        // e.g. a repo was deleted and recreated upstream under a new id but the
        // same name; the fallback treats it as the same logical repo updating
        // in place rather than Delete+Add.
        let stored = repo(1, "github.com/a/b", "old-id", &[("svc:1", "https://github.com/a/b.git")]);
        let sourced = repo(0, "github.com/a/b", "new-id", &[("svc:1", "https://github.com/a/b.git")]);
        let diff = new_diff(vec![sourced], vec![stored]);
        assert_eq!(diff.modified.len(), 1);
        assert_eq!(diff.modified[0].external_repo.id, "new-id");
        assert!(diff.added.is_empty());
        assert!(diff.deleted.is_empty());
    }

    #[test]
    fn duplicate_sourced_entries_collapse_and_union_sources() {
        let a = repo(0, "github.com/a/b", "1", &[("svc:1", "https://github.com/a/b.git")]);
        let b = repo(0, "github.com/a/b", "1", &[("svc:2", "https://mirror.example.com/a/b.git")]);
        let diff = new_diff(vec![a, b], vec![]);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].sources.len(), 2);
    }

    #[test]
    fn duplicate_collapsing_is_order_independent() {
        let a = repo(0, "github.com/a/b", "1", &[("svc:1", "https://github.com/a/b.git")]);
        let b = repo(0, "github.com/a/b", "1", &[("svc:2", "https://mirror.example.com/a/b.git")]);
        let forward = new_diff(vec![a.clone(), b.clone()], vec![]);
        let backward = new_diff(vec![b, a], vec![]);
        assert_eq!(forward, backward);
    }

    #[test]
    fn every_permutation_of_unrelated_repos_yields_identical_classification() {
        let stored = vec![
            repo(1, "github.com/a/one", "1", &[("svc:1", "https://github.com/a/one.git")]),
            repo(2, "github.com/a/two", "2", &[("svc:1", "https://github.com/a/two.git")]),
            repo(3, "github.com/a/three", "3", &[("svc:1", "https://github.com/a/three.git")]),
        ];
        let mut sourced = vec![
            repo(0, "github.com/a/one", "1", &[("svc:1", "https://github.com/a/one.git")]),
            {
                let mut r = repo(0, "github.com/a/two", "2", &[("svc:1", "https://github.com/a/two.git")]);
                r.description = Some("now described".into());
                r
            },
            repo(0, "github.com/a/four", "4", &[("svc:1", "https://github.com/a/four.git")]),
        ];

        let baseline = new_diff(sourced.clone(), stored.clone());
        assert_eq!(baseline.added.len(), 1);
        assert_eq!(baseline.modified.len(), 1);
        assert_eq!(baseline.unmodified.len(), 1);
        assert_eq!(baseline.deleted.len(), 1);

        // permute the sourced and stored orderings; output must not change.
        for perm in [vec![1, 0, 2], vec![2, 1, 0], vec![0, 2, 1]] {
            let reordered: Vec<_> = perm.iter().map(|&i| sourced[i].clone()).collect();
            let mut reordered_stored = stored.clone();
            reordered_stored.reverse();
            let diff = new_diff(reordered, reordered_stored);
            assert_eq!(diff, baseline);
        }
        sourced.reverse();
        assert_eq!(new_diff(sourced, stored), baseline);
    }
}
