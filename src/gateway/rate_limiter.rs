//! Per-route admission control
//!
//! Each (route, policy) pair owns a keyed limiter. Token buckets use
//! `governor` (GCRA); sliding windows keep a one-second log of admission
//! instants per key. Both admit atomically per key.

use crate::domain::{ApiKeyEntry, RateLimitAlgorithm, RateLimitKeyStrategy, Route, RouteId, TenantId};
use crate::gateway::types::{GatewayError, GatewayResult};
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(1);

/// Effective limit for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RatePolicy {
    pub algorithm: RateLimitAlgorithm,
    pub requests_per_second: u32,
    pub burst: u32,
}

impl RatePolicy {
    /// The route's policy; an API key override replaces both rate and burst
    pub fn for_route(route: &Route, api_key: Option<&ApiKeyEntry>) -> Self {
        match api_key.and_then(|k| k.record().rate_limit_override) {
            Some(rps) => Self {
                algorithm: route.rate_limit_algorithm,
                requests_per_second: rps,
                burst: rps,
            },
            None => Self {
                algorithm: route.rate_limit_algorithm,
                requests_per_second: route.rate_limit_requests_per_second,
                burst: route.rate_limit_burst,
            },
        }
    }
}

/// Bucket key for a request under the route's key strategy
pub fn rate_limit_key(
    strategy: RateLimitKeyStrategy,
    tenant_id: TenantId,
    route_id: RouteId,
    api_key: Option<&ApiKeyEntry>,
    client_ip: IpAddr,
) -> String {
    match strategy {
        RateLimitKeyStrategy::Tenant => format!("tenant:{tenant_id}"),
        RateLimitKeyStrategy::Route => format!("route:{route_id}"),
        RateLimitKeyStrategy::Ip => format!("ip:{client_ip}"),
        RateLimitKeyStrategy::ApiKey => match api_key {
            Some(entry) => format!("key:{}", entry.record().id),
            None => format!("ip:{client_ip}"),
        },
    }
}

struct SlidingWindow {
    limit: usize,
    log: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindow {
    fn new(policy: RatePolicy) -> Self {
        let limit = policy.requests_per_second.max(policy.burst).max(1);
        Self {
            limit: usize::try_from(limit).unwrap_or(usize::MAX),
            log: Mutex::new(HashMap::new()),
        }
    }

    fn check(&self, key: &str) -> Result<(), Duration> {
        let now = Instant::now();
        let mut log = self.log.lock();
        let admitted = log.entry(key.to_string()).or_default();
        while admitted
            .front()
            .is_some_and(|first| now.duration_since(*first) >= WINDOW)
        {
            admitted.pop_front();
        }
        if admitted.len() < self.limit {
            admitted.push_back(now);
            return Ok(());
        }
        let oldest = admitted.front().copied().unwrap_or(now);
        Err(WINDOW.saturating_sub(now.duration_since(oldest)))
    }

    fn sweep(&self) {
        let now = Instant::now();
        self.log.lock().retain(|_, admitted| {
            admitted
                .back()
                .is_some_and(|last| now.duration_since(*last) < WINDOW)
        });
    }

    fn len(&self) -> usize {
        self.log.lock().len()
    }
}

enum Limiter {
    TokenBucket(DefaultKeyedRateLimiter<String>),
    SlidingWindow(SlidingWindow),
}

impl Limiter {
    fn new(policy: RatePolicy) -> Self {
        match policy.algorithm {
            RateLimitAlgorithm::TokenBucket => {
                let rate = NonZeroU32::new(policy.requests_per_second).unwrap_or(NonZeroU32::MIN);
                let burst = NonZeroU32::new(policy.burst).unwrap_or(NonZeroU32::MIN);
                Self::TokenBucket(RateLimiter::keyed(Quota::per_second(rate).allow_burst(burst)))
            }
            RateLimitAlgorithm::SlidingWindow => Self::SlidingWindow(SlidingWindow::new(policy)),
        }
    }

    fn check(&self, key: &str) -> Result<(), Duration> {
        match self {
            Self::TokenBucket(limiter) => limiter
                .check_key(&key.to_string())
                .map_err(|not_until| not_until.wait_time_from(DefaultClock::default().now())),
            Self::SlidingWindow(window) => window.check(key),
        }
    }

    fn sweep(&self) {
        match self {
            Self::TokenBucket(limiter) => {
                limiter.retain_recent();
                limiter.shrink_to_fit();
            }
            Self::SlidingWindow(window) => window.sweep(),
        }
    }

    fn tracked_keys(&self) -> usize {
        match self {
            Self::TokenBucket(limiter) => limiter.len(),
            Self::SlidingWindow(window) => window.len(),
        }
    }
}

/// Retry-After value: whole seconds, rounded up, at least one
pub fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

/// All limiters of the gateway, created lazily per (route, policy)
#[derive(Default)]
pub struct RateLimiterRegistry {
    limiters: RwLock<HashMap<(RouteId, RatePolicy), Arc<Limiter>>>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn limiter(&self, route_id: RouteId, policy: RatePolicy) -> Arc<Limiter> {
        if let Some(limiter) = self.limiters.read().get(&(route_id, policy)) {
            return Arc::clone(limiter);
        }
        let mut limiters = self.limiters.write();
        Arc::clone(
            limiters
                .entry((route_id, policy))
                .or_insert_with(|| Arc::new(Limiter::new(policy))),
        )
    }

    /// Admit one request for `key`, or report how long to wait
    pub fn check(&self, route_id: RouteId, policy: RatePolicy, key: &str) -> GatewayResult<()> {
        self.limiter(route_id, policy)
            .check(key)
            .map_err(|wait| GatewayError::RateLimited {
                retry_after_secs: retry_after_secs(wait),
            })
    }

    /// Reclaim state for idle keys
    pub fn sweep(&self) -> usize {
        let limiters: Vec<Arc<Limiter>> = self.limiters.read().values().cloned().collect();
        limiters
            .iter()
            .map(|limiter| {
                limiter.sweep();
                limiter.tracked_keys()
            })
            .sum()
    }

    /// Drop limiters whose route is gone or no longer limits under that policy
    pub fn retain_live(&self, live: &HashSet<(RouteId, RatePolicy)>) {
        self.limiters.write().retain(|key, _| live.contains(key));
    }

    pub fn limiter_count(&self) -> usize {
        self.limiters.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::api_key::generate_secret;
    use crate::domain::{ApiKey, NewApiKey};
    use std::net::Ipv4Addr;
    use tokio_test::{assert_err, assert_ok};

    fn policy(algorithm: RateLimitAlgorithm, rps: u32, burst: u32) -> RatePolicy {
        RatePolicy {
            algorithm,
            requests_per_second: rps,
            burst,
        }
    }

    #[test]
    fn token_bucket_admits_exactly_the_burst() {
        let registry = RateLimiterRegistry::new();
        let route = RouteId::generate();
        let p = policy(RateLimitAlgorithm::TokenBucket, 1, 5);
        for _ in 0..5 {
            assert_ok!(registry.check(route, p, "ip:1.2.3.4"));
        }
        let err = assert_err!(registry.check(route, p, "ip:1.2.3.4"));
        assert!(matches!(err, GatewayError::RateLimited { retry_after_secs } if retry_after_secs >= 1));
        // other keys have their own bucket
        assert_ok!(registry.check(route, p, "ip:5.6.7.8"));
    }

    #[tokio::test(start_paused = true)]
    async fn sliding_window_refills_after_a_second() {
        let registry = RateLimiterRegistry::new();
        let route = RouteId::generate();
        let p = policy(RateLimitAlgorithm::SlidingWindow, 3, 2);
        for _ in 0..3 {
            assert!(registry.check(route, p, "k").is_ok());
        }
        assert!(registry.check(route, p, "k").is_err());

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert!(registry.check(route, p, "k").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_reclaims_idle_window_keys() {
        let registry = RateLimiterRegistry::new();
        let route = RouteId::generate();
        let p = policy(RateLimitAlgorithm::SlidingWindow, 1, 1);
        registry.check(route, p, "a").unwrap();
        registry.check(route, p, "b").unwrap();
        assert_eq!(registry.sweep(), 2);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(registry.sweep(), 0);
    }

    #[test]
    fn retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_millis(1)), 1);
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(1500)), 2);
        assert_eq!(retry_after_secs(Duration::from_secs(3)), 3);
    }

    #[test]
    fn keys_follow_strategy() {
        let tenant = TenantId::generate();
        let route = RouteId::generate();
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let key = ApiKey::create(
            tenant,
            NewApiKey {
                name: "k".into(),
                ..Default::default()
            },
            &generate_secret(),
        )
        .unwrap();
        let entry = ApiKeyEntry::new(key);

        assert_eq!(
            rate_limit_key(RateLimitKeyStrategy::Ip, tenant, route, None, ip),
            "ip:10.0.0.1"
        );
        assert_eq!(
            rate_limit_key(RateLimitKeyStrategy::ApiKey, tenant, route, None, ip),
            "ip:10.0.0.1"
        );
        assert_eq!(
            rate_limit_key(RateLimitKeyStrategy::ApiKey, tenant, route, Some(&entry), ip),
            format!("key:{}", entry.record().id)
        );
        assert_eq!(
            rate_limit_key(RateLimitKeyStrategy::Tenant, tenant, route, None, ip),
            format!("tenant:{tenant}")
        );
    }

    #[test]
    fn stale_limiters_are_dropped() {
        let registry = RateLimiterRegistry::new();
        let keep = RouteId::generate();
        let drop = RouteId::generate();
        let p = policy(RateLimitAlgorithm::TokenBucket, 10, 10);
        let edited = policy(RateLimitAlgorithm::TokenBucket, 20, 20);
        registry.check(keep, p, "k").unwrap();
        registry.check(keep, edited, "k").unwrap();
        registry.check(drop, p, "k").unwrap();
        registry.retain_live(&HashSet::from([(keep, edited)]));
        assert_eq!(registry.limiter_count(), 1);
    }

    async fn admitted_concurrently(
        registry: Arc<RateLimiterRegistry>,
        policy: RatePolicy,
        callers: usize,
    ) -> usize {
        let route = RouteId::generate();
        let barrier = Arc::new(tokio::sync::Barrier::new(callers));
        let tasks: Vec<_> = (0..callers)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    registry.check(route, policy, "ip:9.9.9.9").is_ok()
                })
            })
            .collect();
        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap() {
                admitted += 1;
            }
        }
        admitted
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn simultaneous_requests_never_exceed_the_burst() {
        for algorithm in [RateLimitAlgorithm::TokenBucket, RateLimitAlgorithm::SlidingWindow] {
            let registry = Arc::new(RateLimiterRegistry::new());
            let admitted = admitted_concurrently(registry, policy(algorithm, 1, 10), 64).await;
            assert_eq!(admitted, 10, "{algorithm:?}");
        }
    }
}
