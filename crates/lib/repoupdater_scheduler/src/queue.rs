//! `updateQueue`: the priority heap entries pass through on their way to a
//! worker (spec.md §4.G).
//!
//! `std::collections::BinaryHeap` doesn't support decrease/increase-key or
//! removal by key, both of which the scheduler needs (bumping an
//! already-queued repo's priority, dropping a disabled repo out of the
//! queue) — so this is an array-backed heap of its own, with a
//! `RepoName → index` side table for O(log n) lookups, the same shape as
//! `container/heap` in the system this is modeled on.

use repoupdater_types::RepoName;
use std::collections::HashMap;
use url::Url;

/// Used for repos entering the queue via the schedule loop's periodic fire
/// (spec.md §4.G: "enqueue at low priority").
pub const PRIORITY_LOW: i32 = 0;
/// `UpdateOnce` bumps an entry here regardless of its current priority
/// (spec.md §4.G).
pub const PRIORITY_HIGH: i32 = 10;

/// The clone identity a queue entry carries — everything a
/// [`crate::gitserver::GitserverClient::request_repo_update`] call needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfiguredRepo {
    pub name: RepoName,
    pub clone_url: Url,
}

#[derive(Debug, Clone)]
struct Entry {
    repo: ConfiguredRepo,
    priority: i32,
    seq: u64,
}

/// `(priority desc, seq asc)`: higher priority pops first; among equal
/// priorities, the older (lower-seq) entry pops first — FIFO ties
/// (spec.md §5).
fn pops_before(a: &Entry, b: &Entry) -> bool {
    (a.priority, std::cmp::Reverse(a.seq)) > (b.priority, std::cmp::Reverse(b.seq))
}

/// In-flight entries (acquired by a worker via [`UpdateQueue::acquire_next`])
/// move out of `heap`/`index` into `in_flight`, so a concurrent
/// `updateSource` disabling the repo can observe and track it without
/// being able to drop it out from under the worker — the effect spec.md
/// §4.G describes as "kept in the queue (moved to the back)".
#[derive(Debug, Default)]
pub struct UpdateQueue {
    heap: Vec<Entry>,
    index: HashMap<RepoName, usize>,
    in_flight: HashMap<RepoName, Entry>,
    next_seq: u64,
}

impl UpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn contains(&self, name: &RepoName) -> bool {
        self.index.contains_key(name) || self.in_flight.contains_key(name)
    }

    pub fn is_updating(&self, name: &RepoName) -> bool {
        self.in_flight.contains_key(name)
    }

    /// Enqueues `repo` at `priority`. A repo already queued (not in-flight)
    /// is bumped only if `priority` is strictly higher than what it's
    /// queued at — its `seq` is refreshed too, so a bump moves it behind
    /// any other entry already at that priority. A repo currently
    /// in-flight is left untouched: the worker owns it until it calls
    /// [`UpdateQueue::remove`].
    ///
    /// Returns `true` if the heap changed, so the caller knows whether to
    /// fire the enqueue notification.
    pub fn enqueue(&mut self, repo: ConfiguredRepo, priority: i32) -> bool {
        if self.in_flight.contains_key(&repo.name) {
            return false;
        }
        if let Some(&i) = self.index.get(&repo.name) {
            if priority <= self.heap[i].priority {
                return false;
            }
            self.heap[i].priority = priority;
            self.heap[i].seq = self.next_seq;
            self.next_seq += 1;
            self.fix(i);
            return true;
        }
        let name = repo.name.clone();
        let entry = Entry { repo, priority, seq: self.next_seq };
        self.next_seq += 1;
        let i = self.heap.len();
        self.heap.push(entry);
        self.index.insert(name, i);
        self.sift_up(i);
        true
    }

    /// Returns the highest-priority entry, marking it in-flight so a
    /// second worker can't also acquire it (spec.md §4.G `acquireNext`).
    pub fn acquire_next(&mut self) -> Option<ConfiguredRepo> {
        if self.heap.is_empty() {
            return None;
        }
        let entry = self.remove_at(0);
        let repo = entry.repo.clone();
        self.in_flight.insert(repo.name.clone(), entry);
        Some(repo)
    }

    /// Removes `name`, but only from where the caller expects to find it:
    /// the in-flight table if `updating` is true, the heap otherwise.
    /// Returns `false` if `name` isn't there under that flag — spec.md
    /// §4.G: "`remove(repo, updating)` checks that the caller's view of
    /// the flag matches."
    pub fn remove(&mut self, name: &RepoName, updating: bool) -> bool {
        if updating {
            self.in_flight.remove(name).is_some()
        } else {
            match self.index.get(name).copied() {
                Some(i) => {
                    self.remove_at(i);
                    true
                }
                None => false,
            }
        }
    }

    /// Updates the clone URL of an already-queued, non-in-flight entry in
    /// place (spec.md §4.G: "changed cloneURL... for an already-enqueued
    /// entry... update in place only if updating == false"). A no-op if
    /// the repo isn't queued or is currently in-flight — its ordering is
    /// unaffected since priority/seq don't change.
    pub fn update_clone_url(&mut self, repo: &ConfiguredRepo) -> bool {
        match self.index.get(&repo.name).copied() {
            Some(i) => {
                self.heap[i].repo.clone_url = repo.clone_url.clone();
                true
            }
            None => false,
        }
    }

    fn remove_at(&mut self, i: usize) -> Entry {
        let last = self.heap.len() - 1;
        self.swap(i, last);
        let entry = self.heap.pop().expect("heap is non-empty: i < len was checked by the caller");
        self.index.remove(&entry.repo.name);
        if i < self.heap.len() {
            self.fix(i);
        }
        entry
    }

    fn fix(&mut self, i: usize) {
        let i = self.sift_up(i);
        self.sift_down(i);
    }

    fn sift_up(&mut self, mut i: usize) -> usize {
        while i > 0 {
            let parent = (i - 1) / 2;
            if pops_before(&self.heap[i], &self.heap[parent]) {
                self.swap(i, parent);
                i = parent;
            } else {
                break;
            }
        }
        i
    }

    fn sift_down(&mut self, mut i: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * i + 1;
            let right = 2 * i + 2;
            let mut best = i;
            if left < len && pops_before(&self.heap[left], &self.heap[best]) {
                best = left;
            }
            if right < len && pops_before(&self.heap[right], &self.heap[best]) {
                best = right;
            }
            if best == i {
                break;
            }
            self.swap(i, best);
            i = best;
        }
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        self.index.insert(self.heap[i].repo.name.clone(), i);
        self.index.insert(self.heap[j].repo.name.clone(), j);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn repo(name: &str) -> ConfiguredRepo {
        ConfiguredRepo {
            name: name.parse().unwrap(),
            clone_url: format!("https://example.com/{name}.git").parse().unwrap(),
        }
    }

    #[test]
    fn pops_highest_priority_first() {
        let mut q = UpdateQueue::new();
        q.enqueue(repo("a"), PRIORITY_LOW);
        q.enqueue(repo("b"), PRIORITY_HIGH);
        q.enqueue(repo("c"), PRIORITY_LOW);

        assert_eq!(q.acquire_next().unwrap().name, repo("b").name);
    }

    #[test]
    fn equal_priority_is_fifo() {
        let mut q = UpdateQueue::new();
        q.enqueue(repo("first"), PRIORITY_LOW);
        q.enqueue(repo("second"), PRIORITY_LOW);
        q.enqueue(repo("third"), PRIORITY_LOW);

        assert_eq!(q.acquire_next().unwrap().name, repo("first").name);
        assert_eq!(q.acquire_next().unwrap().name, repo("second").name);
        assert_eq!(q.acquire_next().unwrap().name, repo("third").name);
    }

    #[test]
    fn re_enqueue_at_equal_or_lower_priority_is_a_no_op() {
        let mut q = UpdateQueue::new();
        q.enqueue(repo("a"), PRIORITY_HIGH);
        assert!(!q.enqueue(repo("a"), PRIORITY_HIGH));
        assert!(!q.enqueue(repo("a"), PRIORITY_LOW));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn re_enqueue_at_higher_priority_bumps_and_refreshes_seq() {
        let mut q = UpdateQueue::new();
        q.enqueue(repo("a"), PRIORITY_LOW);
        q.enqueue(repo("b"), PRIORITY_LOW);
        assert!(q.enqueue(repo("a"), PRIORITY_HIGH));

        // "a" now outranks "b" despite having been enqueued first.
        assert_eq!(q.acquire_next().unwrap().name, repo("a").name);
    }

    #[test]
    fn acquire_next_marks_in_flight_and_removes_from_the_heap() {
        let mut q = UpdateQueue::new();
        q.enqueue(repo("a"), PRIORITY_LOW);

        let acquired = q.acquire_next().unwrap();
        assert_eq!(acquired.name, repo("a").name);
        assert!(q.is_empty());
        assert!(q.is_updating(&repo("a").name));
        assert!(q.contains(&repo("a").name));
    }

    #[test]
    fn concurrent_disable_cannot_drop_an_in_flight_update() {
        let mut q = UpdateQueue::new();
        q.enqueue(repo("a"), PRIORITY_LOW);
        q.acquire_next();

        // UpdateOnce racing against the in-flight update must not resurrect
        // it into the visible heap nor clear its in-flight status.
        assert!(!q.enqueue(repo("a"), PRIORITY_HIGH));
        assert!(q.is_updating(&repo("a").name));

        // A disable-driven removal with `updating=false` must not match the
        // in-flight entry either.
        assert!(!q.remove(&repo("a").name, false));
        assert!(q.is_updating(&repo("a").name));
    }

    #[test]
    fn remove_requires_the_caller_view_of_updating_to_match() {
        let mut q = UpdateQueue::new();
        q.enqueue(repo("a"), PRIORITY_LOW);

        assert!(!q.remove(&repo("a").name, true));
        assert!(q.remove(&repo("a").name, false));
        assert!(!q.contains(&repo("a").name));
    }

    #[test]
    fn worker_finishing_removes_the_in_flight_entry() {
        let mut q = UpdateQueue::new();
        q.enqueue(repo("a"), PRIORITY_LOW);
        q.acquire_next();

        assert!(q.remove(&repo("a").name, true));
        assert!(!q.contains(&repo("a").name));
    }

    #[test]
    fn update_clone_url_only_touches_queued_non_in_flight_entries() {
        let mut q = UpdateQueue::new();
        q.enqueue(repo("a"), PRIORITY_LOW);
        let new_url: Url = "https://example.com/a-renamed.git".parse().unwrap();
        assert!(q.update_clone_url(&ConfiguredRepo { name: repo("a").name, clone_url: new_url.clone() }));
        assert_eq!(q.acquire_next().unwrap().clone_url, new_url);

        assert!(!q.update_clone_url(&repo("unknown")));
    }

    #[test]
    fn heap_property_survives_many_random_priority_bumps() {
        let mut q = UpdateQueue::new();
        let names: Vec<String> = (0..20).map(|i| format!("repo-{i}")).collect();
        for name in &names {
            q.enqueue(repo(name), PRIORITY_LOW);
        }
        // Bump every third repo to high priority in a scattered order.
        for name in names.iter().step_by(3) {
            q.enqueue(repo(name), PRIORITY_HIGH);
        }

        let mut popped = Vec::new();
        while let Some(r) = q.acquire_next() {
            popped.push(r.name.as_str().to_string());
        }
        let boosted: Vec<_> = names.iter().step_by(3).cloned().collect();
        assert_eq!(&popped[..boosted.len()], boosted.as_slice());
    }
}
