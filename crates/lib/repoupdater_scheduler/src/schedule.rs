//! `schedule`: the due-ascending heap tracking when each repo's next
//! periodic update fires (spec.md §4.G).

use crate::queue::ConfiguredRepo;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use repoupdater_types::RepoName;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Entry {
    repo: ConfiguredRepo,
    due: DateTime<Utc>,
    interval: Duration,
}

fn due_before(a: &Entry, b: &Entry) -> bool {
    a.due < b.due
}

/// Array-backed min-heap ordered by `due`, with a `RepoName → index` side
/// table for the same reason [`crate::queue::UpdateQueue`] needs one:
/// `updateInterval` has to find and re-heapify an arbitrary entry, not just
/// pop the top.
#[derive(Debug)]
pub struct ScheduleHeap {
    heap: Vec<Entry>,
    index: HashMap<RepoName, usize>,
    min_delay: Duration,
    max_delay: Duration,
}

impl ScheduleHeap {
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self { heap: Vec::new(), index: HashMap::new(), min_delay, max_delay }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, name: &RepoName) -> bool {
        self.index.contains_key(name)
    }

    /// The `due` of the earliest entry — what the schedule loop sleeps
    /// until (spec.md §4.G).
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.heap.first().map(|e| e.due)
    }

    /// Adds a repo with `interval = minDelay`, `due = now + minDelay`
    /// (spec.md §4.G). A no-op if the repo is already scheduled.
    pub fn add(&mut self, repo: ConfiguredRepo, now: DateTime<Utc>) -> bool {
        if self.index.contains_key(&repo.name) {
            return false;
        }
        let name = repo.name.clone();
        let entry = Entry { repo, due: now + to_chrono(self.min_delay), interval: self.min_delay };
        let i = self.heap.len();
        self.heap.push(entry);
        self.index.insert(name, i);
        self.sift_up(i);
        true
    }

    pub fn remove(&mut self, name: &RepoName) -> bool {
        match self.index.get(name).copied() {
            Some(i) => {
                self.remove_at(i);
                true
            }
            None => false,
        }
    }

    /// Clamps `interval` to `[minDelay, maxDelay]` and reschedules `due =
    /// now + interval` (spec.md §4.G `updateInterval`). A no-op if `name`
    /// isn't scheduled.
    pub fn update_interval(&mut self, name: &RepoName, interval: Duration, now: DateTime<Utc>) -> bool {
        let Some(&i) = self.index.get(name) else { return false };
        let clamped = interval.clamp(self.min_delay, self.max_delay);
        self.heap[i].interval = clamped;
        self.heap[i].due = now + to_chrono(clamped);
        self.fix(i);
        true
    }

    /// Pops every entry whose `due <= now`, rescheduling each at `due = now
    /// + interval`, and returns the repos to enqueue at low priority
    /// (spec.md §4.G schedule-loop step).
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<ConfiguredRepo> {
        let mut fired = Vec::new();
        while matches!(self.heap.first(), Some(top) if top.due <= now) {
            let mut entry = self.remove_at(0);
            fired.push(entry.repo.clone());
            entry.due = now + to_chrono(entry.interval);
            let name = entry.repo.name.clone();
            let i = self.heap.len();
            self.heap.push(entry);
            self.index.insert(name, i);
            self.sift_up(i);
        }
        fired
    }

    /// Updates the clone URL of an already-scheduled entry in place,
    /// leaving `due`/`interval` untouched (spec.md §4.G: "changed
    /// cloneURL... for an already-enqueued entry"). A no-op if `name`
    /// isn't scheduled.
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
            if due_before(&self.heap[i], &self.heap[parent]) {
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
            if left < len && due_before(&self.heap[left], &self.heap[best]) {
                best = left;
            }
            if right < len && due_before(&self.heap[right], &self.heap[best]) {
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

fn to_chrono(d: Duration) -> ChronoDuration {
    ChronoDuration::from_std(d).expect("scheduler delays fit in chrono::Duration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MIN_DELAY: Duration = Duration::from_secs(45);
    const MAX_DELAY: Duration = Duration::from_secs(8 * 3600);

    fn repo(name: &str) -> ConfiguredRepo {
        ConfiguredRepo {
            name: name.parse().unwrap(),
            clone_url: format!("https://example.com/{name}.git").parse().unwrap(),
        }
    }

    fn epoch() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc)
    }

    #[test]
    fn add_schedules_at_now_plus_min_delay() {
        let mut s = ScheduleHeap::new(MIN_DELAY, MAX_DELAY);
        let now = epoch();
        s.add(repo("a"), now);
        assert_eq!(s.next_due(), Some(now + to_chrono(MIN_DELAY)));
    }

    #[test]
    fn adding_twice_is_a_no_op() {
        let mut s = ScheduleHeap::new(MIN_DELAY, MAX_DELAY);
        let now = epoch();
        assert!(s.add(repo("a"), now));
        assert!(!s.add(repo("a"), now));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn pop_due_only_returns_entries_at_or_before_now_and_reschedules_them() {
        let mut s = ScheduleHeap::new(MIN_DELAY, MAX_DELAY);
        let now = epoch();
        s.add(repo("a"), now);
        s.add(repo("b"), now);

        assert!(s.pop_due(now).is_empty());

        let later = now + to_chrono(MIN_DELAY);
        let fired = s.pop_due(later);
        assert_eq!(fired.len(), 2);

        // Rescheduled at `later + min_delay`, not popped again immediately.
        assert!(s.pop_due(later).is_empty());
        assert_eq!(s.next_due(), Some(later + to_chrono(MIN_DELAY)));
    }

    #[test]
    fn update_interval_clamps_to_the_configured_range() {
        let mut s = ScheduleHeap::new(MIN_DELAY, MAX_DELAY);
        let now = epoch();
        s.add(repo("a"), now);

        assert!(s.update_interval(&repo("a").name, Duration::from_secs(1), now));
        assert_eq!(s.next_due(), Some(now + to_chrono(MIN_DELAY)));

        assert!(s.update_interval(&repo("a").name, Duration::from_secs(100 * 3600), now));
        assert_eq!(s.next_due(), Some(now + to_chrono(MAX_DELAY)));
    }

    #[test]
    fn update_interval_on_unscheduled_repo_is_a_no_op() {
        let mut s = ScheduleHeap::new(MIN_DELAY, MAX_DELAY);
        assert!(!s.update_interval(&repo("a").name, MIN_DELAY, epoch()));
    }

    #[test]
    fn remove_drops_an_entry_and_next_due_reflects_the_remainder() {
        let mut s = ScheduleHeap::new(MIN_DELAY, MAX_DELAY);
        let now = epoch();
        s.add(repo("a"), now);
        s.add(repo("b"), now + to_chrono(MIN_DELAY));

        assert!(s.remove(&repo("a").name));
        assert_eq!(s.next_due(), Some(now + to_chrono(2 * MIN_DELAY)));
        assert!(!s.remove(&repo("a").name));
    }

    #[test]
    fn heap_property_survives_many_interleaved_updates() {
        let mut s = ScheduleHeap::new(MIN_DELAY, MAX_DELAY);
        let now = epoch();
        let names: Vec<String> = (0..15).map(|i| format!("repo-{i}")).collect();
        for name in &names {
            s.add(repo(name), now);
        }
        for (i, name) in names.iter().enumerate() {
            s.update_interval(&repo(name).name, Duration::from_secs(45 + i as u64 * 100), now);
        }

        let mut last_due = None;
        while let Some(due) = s.next_due() {
            let fired = s.pop_due(due);
            assert!(!fired.is_empty());
            if let Some(prev) = last_due {
                assert!(due >= prev);
            }
            last_due = Some(due);
            if due > now + to_chrono(MAX_DELAY) {
                break;
            }
        }
    }
}
