//! The Update Scheduler (spec.md §4.G): tracks every enabled repo across all
//! external services, periodically enqueues them for a mirror-fetch, and
//! runs a bounded-concurrency worker pool against the gitserver RPC.

mod clock;
mod config;
mod gitserver;
mod metrics;
mod queue;
mod schedule;
mod scheduler;

pub use clock::{Clock, FakeClock, SystemClock};
pub use config::Config;
pub use gitserver::{FakeGitserverClient, GitserverClient, GitserverError, HttpGitserverClient, RepoUpdateResponse};
pub use metrics::SchedulerMetrics;
pub use queue::{ConfiguredRepo, PRIORITY_HIGH, PRIORITY_LOW};
pub use scheduler::{Cancel, Scheduler, SourceRepo, UpdateSourceCounts};
