//! The Update Scheduler (spec.md §4.G): two independent heaps plus a map,
//! a schedule loop, and a bounded-concurrency update loop.

use crate::clock::{Clock, SystemClock};
use crate::gitserver::GitserverClient;
use crate::metrics::SchedulerMetrics;
use crate::queue::{ConfiguredRepo, PRIORITY_HIGH, PRIORITY_LOW, UpdateQueue};
use crate::schedule::ScheduleHeap;
use repoupdater_types::{ExternalServiceId, RepoName};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, info, warn};
use url::Url;

/// A cooperative shutdown signal shared between the schedule loop, the
/// update loop, and whatever drives them (spec.md §5: "every public
/// operation takes an externally cancellable context"). Cheaper than
/// pulling in a whole cancellation-token crate for one flag.
#[derive(Default)]
pub struct Cancel {
    cancelled: AtomicBool,
    notify: Notify,
}

impl Cancel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`Cancel::cancel`] has been called. Building the
    /// `Notified` future before the flag check (rather than after) is what
    /// makes this race-free against a `cancel()` landing in between.
    pub async fn cancelled(&self) {
        let notified = self.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// One source's view of one repo — `sourceRepos[sourceID][name]` (spec.md
/// §4.G).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRepo {
    pub name: RepoName,
    pub clone_url: Url,
    pub enabled: bool,
}

impl SourceRepo {
    fn configured(&self) -> ConfiguredRepo {
        ConfiguredRepo { name: self.name.clone(), clone_url: self.clone_url.clone() }
    }
}

/// What `updateSource` changed, returned to the caller (spec.md §4.G:
/// "Returns counters").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateSourceCounts {
    pub added: usize,
    pub removed: usize,
    pub updated: usize,
}

struct Inner {
    update_queue: UpdateQueue,
    schedule: ScheduleHeap,
    source_repos: HashMap<ExternalServiceId, HashMap<RepoName, SourceRepo>>,
}

/// Owns both heaps and `sourceRepos` behind one mutex — "all public
/// operations acquire it briefly and then release before any I/O"
/// (spec.md §5).
pub struct Scheduler {
    inner: Mutex<Inner>,
    notify_enqueue: Notify,
    wakeup: Notify,
    clock: Arc<dyn Clock>,
    gitserver: Arc<dyn GitserverClient>,
    concurrency: Arc<Semaphore>,
    metrics: SchedulerMetrics,
}

impl Scheduler {
    pub fn new(
        config: &crate::config::Config,
        gitserver: Arc<dyn GitserverClient>,
        metrics: SchedulerMetrics,
    ) -> Self {
        Self::with_clock(config, gitserver, metrics, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: &crate::config::Config,
        gitserver: Arc<dyn GitserverClient>,
        metrics: SchedulerMetrics,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                update_queue: UpdateQueue::new(),
                schedule: ScheduleHeap::new(config.min_delay, config.max_delay),
                source_repos: HashMap::new(),
            }),
            notify_enqueue: Notify::new(),
            wakeup: Notify::new(),
            clock,
            gitserver,
            concurrency: Arc::new(Semaphore::new(config.git_max_concurrent_clones.max(1))),
            metrics,
        }
    }

    pub fn queue_len(&self) -> usize {
        self.inner.lock().unwrap().update_queue.len()
    }

    pub fn schedule_len(&self) -> usize {
        self.inner.lock().unwrap().schedule.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.inner.lock().unwrap().update_queue.in_flight_len()
    }

    /// `updateSource(sourceID, newList)` (spec.md §4.G): computes the three
    /// deltas vs `sourceRepos[sourceID]` and replaces it atomically.
    pub fn update_source(&self, source_id: ExternalServiceId, new_list: Vec<SourceRepo>) -> UpdateSourceCounts {
        let now = self.clock.now();
        let mut counts = UpdateSourceCounts::default();
        let mut should_notify_enqueue = false;

        let new_map: HashMap<RepoName, SourceRepo> =
            new_list.into_iter().map(|r| (r.name.clone(), r)).collect();

        let mut inner = self.inner.lock().unwrap();
        let old = inner.source_repos.remove(&source_id).unwrap_or_default();

        for (name, new_repo) in &new_map {
            match old.get(name) {
                None => {
                    if new_repo.enabled {
                        inner.update_queue.enqueue(new_repo.configured(), PRIORITY_LOW);
                        inner.schedule.add(new_repo.configured(), now);
                        counts.added += 1;
                        should_notify_enqueue = true;
                    }
                }
                Some(old_repo) if old_repo.enabled && !new_repo.enabled => {
                    inner.schedule.remove(name);
                    if !inner.update_queue.is_updating(name) {
                        inner.update_queue.remove(name, false);
                    }
                    counts.removed += 1;
                }
                Some(old_repo) if !old_repo.enabled && new_repo.enabled => {
                    inner.update_queue.enqueue(new_repo.configured(), PRIORITY_LOW);
                    inner.schedule.add(new_repo.configured(), now);
                    counts.added += 1;
                    should_notify_enqueue = true;
                }
                Some(old_repo) if old_repo.clone_url != new_repo.clone_url => {
                    if !inner.update_queue.is_updating(name) {
                        inner.update_queue.update_clone_url(&new_repo.configured());
                        inner.schedule.update_clone_url(&new_repo.configured());
                        counts.updated += 1;
                    }
                }
                Some(_) => {}
            }
        }

        for (name, old_repo) in &old {
            if !new_map.contains_key(name) && old_repo.enabled {
                inner.schedule.remove(name);
                if !inner.update_queue.is_updating(name) {
                    inner.update_queue.remove(name, false);
                }
                counts.removed += 1;
            }
        }

        inner.source_repos.insert(source_id, new_map);
        drop(inner);

        if should_notify_enqueue {
            self.notify_enqueue.notify_waiters();
        }
        counts
    }

    /// `UpdateOnce(repo)` (spec.md §4.G): enqueues at high priority,
    /// bumping any existing low-priority entry.
    pub fn update_once(&self, repo: ConfiguredRepo) {
        let changed = self.inner.lock().unwrap().update_queue.enqueue(repo, PRIORITY_HIGH);
        if changed {
            self.notify_enqueue.notify_waiters();
        }
    }

    /// `Schedule(repo)` (spec.md §4.G): schedule-add if absent.
    pub fn schedule(&self, repo: ConfiguredRepo) {
        let now = self.clock.now();
        let mut inner = self.inner.lock().unwrap();
        if inner.schedule.add(repo, now) {
            self.metrics.scheduled_total.add(1, &[]);
            drop(inner);
            self.wakeup.notify_waiters();
        }
    }

    /// Runs the schedule loop until `cancel` fires (spec.md §4.G): blocks
    /// until the earliest `due` or a `wakeup`, then enqueues every entry
    /// whose `due <= now()` at low priority.
    pub async fn run_schedule_loop(&self, cancel: &Cancel) {
        loop {
            let sleep_for = {
                let inner = self.inner.lock().unwrap();
                match inner.schedule.next_due() {
                    Some(due) => (due - self.clock.now()).to_std().unwrap_or(Duration::ZERO),
                    None => Duration::from_secs(3600),
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("schedule loop cancelled");
                    return;
                }
                _ = tokio::time::sleep(sleep_for) => {}
                _ = self.wakeup.notified() => {}
            }

            let due = {
                let mut inner = self.inner.lock().unwrap();
                inner.schedule.pop_due(self.clock.now())
            };
            if due.is_empty() {
                continue;
            }
            let mut changed = false;
            {
                let mut inner = self.inner.lock().unwrap();
                for repo in due {
                    changed |= inner.update_queue.enqueue(repo, PRIORITY_LOW);
                }
            }
            if changed {
                self.notify_enqueue.notify_waiters();
            }
        }
    }

    /// Runs the bounded worker pool until `cancel` fires (spec.md §4.G):
    /// each worker acquires a concurrency slot, pops the highest-priority
    /// non-in-flight entry (blocking on the enqueue notification when
    /// empty), calls [`GitserverClient::request_repo_update`], adjusts
    /// the schedule interval from the response, and releases.
    pub async fn run_update_loop(&self, cancel: &Cancel) {
        loop {
            let permit = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("update loop cancelled");
                    return;
                }
                permit = self.concurrency.clone().acquire_owned() => permit.expect("semaphore is never closed"),
            };

            let repo = loop {
                if let Some(repo) = self.inner.lock().unwrap().update_queue.acquire_next() {
                    break repo;
                }
                tokio::select! {
                    _ = cancel.cancelled() => {
                        drop(permit);
                        return;
                    }
                    _ = self.notify_enqueue.notified() => {}
                }
            };

            self.run_one_update(repo, permit).await;
        }
    }

    async fn run_one_update(&self, repo: ConfiguredRepo, permit: tokio::sync::OwnedSemaphorePermit) {
        let name = repo.name.clone();
        match self.gitserver.request_repo_update(&repo, None).await {
            Ok(response) => {
                self.metrics.update_success_total.add(1, &[]);
                if let (Some(last_fetched), Some(last_changed)) = (response.last_fetched, response.last_changed) {
                    if let Ok(interval) = (last_fetched - last_changed).to_std() {
                        self.inner.lock().unwrap().schedule.update_interval(&name, interval, self.clock.now());
                    }
                }
            }
            Err(e) => {
                self.metrics.update_failure_total.add(1, &[]);
                warn!(repo = %name, error = %e, "repo update failed");
            }
        }
        drop(permit);
        self.inner.lock().unwrap().update_queue.remove(&name, true);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        info!(
            queue = self.update_queue.len(),
            in_flight = self.update_queue.in_flight_len(),
            scheduled = self.schedule.len(),
            "scheduler shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gitserver::FakeGitserverClient;
    use pretty_assertions::assert_eq;
    use repoupdater_metrics::NoopMeterProvider;
    use repoupdater_types::ExternalServiceId;
    use std::time::Duration as StdDuration;

    fn source_repo(name: &str, enabled: bool) -> SourceRepo {
        SourceRepo {
            name: name.parse().unwrap(),
            clone_url: format!("https://example.com/{name}.git").parse().unwrap(),
            enabled,
        }
    }

    fn scheduler() -> Scheduler {
        let config = crate::config::Config {
            min_delay: StdDuration::from_secs(45),
            max_delay: StdDuration::from_secs(8 * 3600),
            git_max_concurrent_clones: 2,
        };
        let meter_provider: repoupdater_metrics::AnyMeterProvider = Arc::new(NoopMeterProvider::new());
        let metrics = SchedulerMetrics::new(&meter_provider);
        Scheduler::new(&config, Arc::new(FakeGitserverClient::new()), metrics)
    }

    #[test]
    fn update_source_enqueues_and_schedules_newly_enabled_repos() {
        let s = scheduler();
        let id = ExternalServiceId(1);

        let counts = s.update_source(id, vec![source_repo("a", true), source_repo("b", true)]);
        assert_eq!(counts, UpdateSourceCounts { added: 2, removed: 0, updated: 0 });
        assert_eq!(s.queue_len(), 2);
        assert_eq!(s.schedule_len(), 2);
    }

    #[test]
    fn update_source_disabling_a_repo_removes_it_from_both_heaps() {
        let s = scheduler();
        let id = ExternalServiceId(1);
        s.update_source(id, vec![source_repo("a", true)]);

        let counts = s.update_source(id, vec![source_repo("a", false)]);
        assert_eq!(counts, UpdateSourceCounts { added: 0, removed: 1, updated: 0 });
        assert_eq!(s.queue_len(), 0);
        assert_eq!(s.schedule_len(), 0);
    }

    #[test]
    fn update_source_dropping_a_repo_entirely_removes_it() {
        let s = scheduler();
        let id = ExternalServiceId(1);
        s.update_source(id, vec![source_repo("a", true), source_repo("b", true)]);

        let counts = s.update_source(id, vec![source_repo("a", true)]);
        assert_eq!(counts, UpdateSourceCounts { added: 0, removed: 1, updated: 0 });
        assert_eq!(s.queue_len(), 1);
    }

    #[test]
    fn update_source_changed_clone_url_updates_in_place_without_requeuing() {
        let s = scheduler();
        let id = ExternalServiceId(1);
        s.update_source(id, vec![source_repo("a", true)]);

        let mut renamed = source_repo("a", true);
        renamed.clone_url = "https://example.com/a-renamed.git".parse().unwrap();
        let counts = s.update_source(id, vec![renamed]);
        assert_eq!(counts, UpdateSourceCounts { added: 0, removed: 0, updated: 1 });
        assert_eq!(s.queue_len(), 1);
    }

    #[test]
    fn update_once_bumps_an_already_scheduled_repo_to_high_priority() {
        let s = scheduler();
        let id = ExternalServiceId(1);
        s.update_source(id, vec![source_repo("a", true), source_repo("b", true)]);

        s.update_once(ConfiguredRepo { name: "b".parse().unwrap(), clone_url: "https://example.com/b.git".parse().unwrap() });
        assert_eq!(s.queue_len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn update_loop_drains_the_queue_and_releases_in_flight_slots() {
        let s = Arc::new(scheduler());
        let id = ExternalServiceId(1);
        s.update_source(id, vec![source_repo("a", true)]);

        let cancel = Arc::new(Cancel::new());
        let loop_handle = {
            let s = s.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { s.run_update_loop(&cancel).await })
        };

        for _ in 0..200 {
            if s.queue_len() == 0 && s.in_flight_len() == 0 {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(1)).await;
        }
        assert_eq!(s.queue_len(), 0);
        assert_eq!(s.in_flight_len(), 0);

        cancel.cancel();
        loop_handle.await.unwrap();
    }
}
