use dashmap::DashMap;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use repoupdater_externalservice::ExternalService;
use repoupdater_types::ExternalServiceKind;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// The burst/replenishment pair a bucket was built from, kept alongside the
/// limiter itself so a repeat `set_limit` for an unchanged rate is a no-op
/// (spec.md §4.H).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    pub burst: NonZeroU32,
    pub replenish_interval: Duration,
}

impl Limit {
    pub fn per_second(requests_per_second: NonZeroU32) -> Self {
        Self {
            burst: requests_per_second,
            replenish_interval: Duration::from_secs(1),
        }
    }

    /// A single-token bucket replenishing at `requests_per_hour` (spec.md
    /// §4.H). Used for the hosts this registry consolidates limits for,
    /// which are specified as an hourly API budget rather than a raw
    /// per-second rate.
    pub fn per_hour(requests_per_hour: f64) -> Self {
        let requests_per_hour = requests_per_hour.max(1.0);
        Self {
            burst: NonZeroU32::new(1).expect("1 is non-zero"),
            replenish_interval: Duration::from_secs_f64(3600.0 / requests_per_hour),
        }
    }

    fn to_quota(self) -> Quota {
        Quota::with_period(self.replenish_interval / self.burst.get())
            .expect("replenish interval is non-zero")
            .allow_burst(self.burst)
    }
}

/// The requests/hour ceiling applied when a service on this host doesn't
/// configure its own (spec.md §4.H worked example uses a 5000/h GitHub
/// default). Kinds absent here have no uniform host-wide API budget to
/// consolidate — Gitolite enumerates over SSH, Phabricator and "Other"
/// have no paginated listing call this registry paces — and are silently
/// skipped, per spec.md §4.H: "rate-limit configurations… marked
/// 'unsupported' for a kind are silently skipped."
fn default_requests_per_hour(kind: ExternalServiceKind) -> Option<f64> {
    match kind {
        ExternalServiceKind::GitHub => Some(5_000.0),
        ExternalServiceKind::GitLab => Some(2_000.0),
        ExternalServiceKind::BitbucketServer => Some(1_000.0),
        ExternalServiceKind::BitbucketCloud => Some(1_000.0),
        ExternalServiceKind::AwsCodeCommit
        | ExternalServiceKind::Gitolite
        | ExternalServiceKind::Phabricator
        | ExternalServiceKind::Other => None,
    }
}

/// Recomputes, from the current External-Services list, the effective
/// per-host rate limit and applies it to `registry` (spec.md §4.H): the
/// minimum of all configured limits for a host, except that any explicit,
/// enabled `rateLimit` override replaces the kind's default outright even
/// if it is numerically higher than that default (spec.md §9 worked
/// example: one default 5000/h, two explicit overrides at 1000/h and
/// 2000/h on the same host → effective 1000/h; a fourth service left at
/// its default does not pull the effective limit back up).
pub fn sync_rate_limiters(registry: &RateLimitRegistry, services: &[ExternalService]) {
    let mut defaults: HashMap<String, f64> = HashMap::new();
    let mut explicit: HashMap<String, f64> = HashMap::new();

    for service in services {
        if service.is_deleted() {
            continue;
        }
        let Some(default_rate) = default_requests_per_hour(service.kind) else { continue };
        let Ok(base_url) = service.base_url() else { continue };
        let host = base_url.host_str().unwrap_or_else(|| base_url.as_str()).to_string();

        let configured = service.configuration().ok().and_then(|c| c.rate_limit_override());
        match configured {
            Some(rate) => explicit.entry(host).and_modify(|current| *current = current.min(rate)).or_insert(rate),
            None => defaults.entry(host).and_modify(|current| *current = current.min(default_rate)).or_insert(default_rate),
        };
    }

    for (host, rate) in defaults {
        if !explicit.contains_key(&host) {
            registry.set_limit(&host, Limit::per_hour(rate));
        }
    }
    for (host, rate) in explicit {
        registry.set_limit(&host, Limit::per_hour(rate));
    }
}

struct Bucket {
    limit: Limit,
    limiter: Arc<DefaultDirectRateLimiter>,
}

/// One token bucket per external service host, keyed by hostname
/// (spec.md §4.H: "a registry of rate limiters, one per external service").
///
/// Rebuilding a bucket resets its accumulated burst allowance, so
/// `set_limit` only replaces the limiter when the requested rate actually
/// differs from what's registered; in-flight [`RateLimitRegistry::wait`]
/// calls hold their own `Arc` to whichever limiter they started against, so
/// swapping the map entry never affects them.
#[derive(Default)]
pub struct RateLimitRegistry {
    buckets: DashMap<String, Bucket>,
}

impl RateLimitRegistry {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Registers or updates the rate limit for `key` (an external service's
    /// host). A no-op if `limit` matches what's already registered.
    pub fn set_limit(&self, key: &str, limit: Limit) {
        let needs_replace = match self.buckets.get(key) {
            Some(bucket) => bucket.limit != limit,
            None => true,
        };
        if needs_replace {
            debug!(key, ?limit, "(re)creating rate limiter");
            self.buckets.insert(
                key.to_string(),
                Bucket {
                    limit,
                    limiter: Arc::new(RateLimiter::direct(limit.to_quota())),
                },
            );
        }
    }

    pub fn remove(&self, key: &str) {
        self.buckets.remove(key);
    }

    /// Blocks until `key`'s bucket has a token available. Keys with no
    /// registered limit are unthrottled.
    pub async fn wait(&self, key: &str) {
        let Some(limiter) = self.buckets.get(key).map(|bucket| bucket.limiter.clone()) else {
            return;
        };
        limiter.until_ready().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_key_is_a_no_op() {
        let registry = RateLimitRegistry::new();
        // must not panic or hang; there's no bucket for this key.
        assert!(registry.buckets.get("unknown.example").is_none());
    }

    #[test]
    fn set_limit_is_idempotent_for_the_same_rate() {
        let registry = RateLimitRegistry::new();
        let limit = Limit::per_second(NonZeroU32::new(10).unwrap());
        registry.set_limit("github.com", limit);
        let first_ptr = Arc::as_ptr(&registry.buckets.get("github.com").unwrap().limiter);

        registry.set_limit("github.com", limit);
        let second_ptr = Arc::as_ptr(&registry.buckets.get("github.com").unwrap().limiter);

        assert_eq!(first_ptr, second_ptr);
    }

    #[test]
    fn set_limit_replaces_bucket_on_rate_change() {
        let registry = RateLimitRegistry::new();
        registry.set_limit("github.com", Limit::per_second(NonZeroU32::new(10).unwrap()));
        let first_ptr = Arc::as_ptr(&registry.buckets.get("github.com").unwrap().limiter);

        registry.set_limit("github.com", Limit::per_second(NonZeroU32::new(20).unwrap()));
        let second_ptr = Arc::as_ptr(&registry.buckets.get("github.com").unwrap().limiter);

        assert_ne!(first_ptr, second_ptr);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_throttles_to_the_configured_rate() {
        let registry = RateLimitRegistry::new();
        registry.set_limit("github.com", Limit::per_second(NonZeroU32::new(1).unwrap()));

        registry.wait("github.com").await;
        let start = tokio::time::Instant::now();
        registry.wait("github.com").await;
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    fn service(id: i32, kind: ExternalServiceKind, config: &str) -> ExternalService {
        let now = chrono::Utc::now();
        ExternalService {
            id: repoupdater_types::ExternalServiceId(id),
            kind,
            display_name: "test".to_string(),
            config: config.to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn effective_rate(registry: &RateLimitRegistry, host: &str) -> f64 {
        let bucket = registry.buckets.get(host).unwrap();
        3600.0 / bucket.limit.replenish_interval.as_secs_f64()
    }

    #[test]
    fn consolidates_to_the_lowest_explicit_override_on_one_host() {
        let registry = RateLimitRegistry::new();
        let services = vec![
            service(1, ExternalServiceKind::GitHub, r#"{"url": "https://gh.example/", "token": null}"#),
            service(
                2,
                ExternalServiceKind::GitHub,
                r#"{"url": "https://gh.example/", "token": null, "rateLimit": {"enabled": true, "requestsPerHour": 1000}}"#,
            ),
            service(
                3,
                ExternalServiceKind::GitHub,
                r#"{"url": "https://gh.example/", "token": null, "rateLimit": {"enabled": true, "requestsPerHour": 2000}}"#,
            ),
        ];

        sync_rate_limiters(&registry, &services);
        assert_eq!(effective_rate(&registry, "gh.example"), 1000.0);
    }

    #[test]
    fn a_default_only_service_does_not_pull_the_limit_back_up() {
        let registry = RateLimitRegistry::new();
        let mut services = vec![
            service(1, ExternalServiceKind::GitHub, r#"{"url": "https://gh.example/", "token": null}"#),
            service(
                2,
                ExternalServiceKind::GitHub,
                r#"{"url": "https://gh.example/", "token": null, "rateLimit": {"enabled": true, "requestsPerHour": 1000}}"#,
            ),
        ];
        sync_rate_limiters(&registry, &services);
        assert_eq!(effective_rate(&registry, "gh.example"), 1000.0);

        services.push(service(4, ExternalServiceKind::GitHub, r#"{"url": "https://gh.example/", "token": null}"#));
        sync_rate_limiters(&registry, &services);
        assert_eq!(effective_rate(&registry, "gh.example"), 1000.0);
    }

    #[test]
    fn no_override_anywhere_falls_back_to_the_kind_default() {
        let registry = RateLimitRegistry::new();
        let services = vec![service(1, ExternalServiceKind::GitHub, r#"{"url": "https://gh2.example/", "token": null}"#)];
        sync_rate_limiters(&registry, &services);
        assert_eq!(effective_rate(&registry, "gh2.example"), 5_000.0);
    }

    #[test]
    fn unsupported_kinds_are_silently_skipped() {
        let registry = RateLimitRegistry::new();
        let services = vec![service(
            1,
            ExternalServiceKind::Phabricator,
            r#"{"url": "https://phab.example/"}"#,
        )];
        sync_rate_limiters(&registry, &services);
        assert!(registry.buckets.get("phab.example").is_none());
    }
}
