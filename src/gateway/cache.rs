//! Response cache
//!
//! Entries are addressed by (tenant, rendered cache key) and spread over a
//! fixed number of `RwLock` shards. Expired entries are dropped lazily on
//! lookup and eagerly by [`ResponseCache::sweep`]. Hit and miss counters are
//! kept per tenant for the stats endpoint.

use crate::domain::{Route, TenantId};
use crate::gateway::headers::forbids_cache;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{HeaderMap, Method, StatusCode};
use parking_lot::{RwLock, RwLockWriteGuard};
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

type ShardKey = (TenantId, String);
type Shard = HashMap<ShardKey, Arc<CacheEntry>>;

/// Stored upstream response
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CachedResponse {
    fn size_bytes(&self) -> usize {
        let headers: usize = self
            .headers
            .iter()
            .map(|(name, value)| name.as_str().len() + value.len())
            .sum();
        headers + self.body.len()
    }
}

#[derive(Debug)]
pub struct CacheEntry {
    pub key: String,
    pub tenant_id: TenantId,
    pub response: CachedResponse,
    pub ttl: Duration,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    deadline: Instant,
    hit_count: AtomicU64,
}

impl CacheEntry {
    fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    pub fn hit_count(&self) -> u64 {
        self.hit_count.load(Ordering::Relaxed)
    }

    fn size_bytes(&self) -> usize {
        self.key.len() + self.response.size_bytes()
    }

    pub fn view(&self) -> CacheEntryView {
        CacheEntryView {
            key: self.key.clone(),
            value: CachedValueView {
                status: self.response.status.as_u16(),
                headers: self
                    .response
                    .headers
                    .iter()
                    .filter_map(|(name, value)| {
                        value
                            .to_str()
                            .ok()
                            .map(|v| (name.as_str().to_string(), v.to_string()))
                    })
                    .collect(),
                body: STANDARD.encode(&self.response.body),
            },
            ttl: self.ttl.as_secs(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            hit_count: self.hit_count(),
        }
    }
}

/// JSON form of an entry for the management API
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntryView {
    pub key: String,
    pub value: CachedValueView,
    pub ttl: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub hit_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CachedValueView {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    /// Base64 of the response body
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub hit_rate: f64,
    pub hits: u64,
    pub misses: u64,
    pub memory_used_bytes: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Size limits for [`ResponseCache`]
#[derive(Debug, Clone, Copy)]
pub struct CacheLimits {
    pub max_entries: usize,
    pub shards: usize,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            shards: 16,
        }
    }
}

pub struct ResponseCache {
    shards: Vec<RwLock<Shard>>,
    shard_capacity: usize,
    counters: RwLock<HashMap<TenantId, Arc<Counters>>>,
}

impl ResponseCache {
    pub fn new(limits: CacheLimits) -> Self {
        let shards = limits.shards.max(1);
        Self {
            shards: (0..shards).map(|_| RwLock::new(HashMap::new())).collect(),
            shard_capacity: limits.max_entries.div_ceil(shards).max(1),
            counters: RwLock::new(HashMap::new()),
        }
    }

    fn shard(&self, key: &ShardKey) -> &RwLock<Shard> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = usize::try_from(hasher.finish() % self.shards.len() as u64).unwrap_or(0);
        &self.shards[index]
    }

    fn counters(&self, tenant_id: TenantId) -> Arc<Counters> {
        if let Some(counters) = self.counters.read().get(&tenant_id) {
            return Arc::clone(counters);
        }
        Arc::clone(self.counters.write().entry(tenant_id).or_default())
    }

    /// Fresh entry for the key; counts a hit or a miss for the tenant
    pub fn get(&self, tenant_id: TenantId, key: &str) -> Option<Arc<CacheEntry>> {
        let shard_key = (tenant_id, key.to_string());
        let shard = self.shard(&shard_key);
        let now = Instant::now();

        let found = shard.read().get(&shard_key).cloned();
        let fresh = match found {
            Some(entry) if !entry.is_expired_at(now) => Some(entry),
            Some(_) => {
                let mut guard = shard.write();
                if guard
                    .get(&shard_key)
                    .is_some_and(|entry| entry.is_expired_at(now))
                {
                    guard.remove(&shard_key);
                }
                None
            }
            None => None,
        };

        let counters = self.counters(tenant_id);
        match &fresh {
            Some(entry) => {
                entry.hit_count.fetch_add(1, Ordering::Relaxed);
                counters.hits.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                counters.misses.fetch_add(1, Ordering::Relaxed);
            }
        }
        fresh
    }

    /// Store a response; a full shard evicts its soonest-expiring entry
    pub fn insert(&self, tenant_id: TenantId, key: String, response: CachedResponse, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let created_at = Utc::now();
        let expires_at = created_at
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(0));
        let shard_key = (tenant_id, key.clone());
        let entry = Arc::new(CacheEntry {
            key,
            tenant_id,
            response,
            ttl,
            created_at,
            expires_at,
            deadline: Instant::now() + ttl,
            hit_count: AtomicU64::new(0),
        });

        let mut shard = self.shard(&shard_key).write();
        if !shard.contains_key(&shard_key) && shard.len() >= self.shard_capacity {
            let now = Instant::now();
            shard.retain(|_, e| !e.is_expired_at(now));
            if shard.len() >= self.shard_capacity {
                let victim = shard
                    .iter()
                    .min_by_key(|(_, e)| e.deadline)
                    .map(|(k, _)| k.clone());
                if let Some(victim) = victim {
                    shard.remove(&victim);
                }
            }
        }
        shard.insert(shard_key, entry);
    }

    /// Unexpired entries of a tenant whose key contains `search`
    pub fn list(&self, tenant_id: TenantId, search: Option<&str>) -> Vec<CacheEntryView> {
        let now = Instant::now();
        let search = search.map(str::trim).filter(|s| !s.is_empty());
        let mut views: Vec<CacheEntryView> = self
            .shards
            .iter()
            .flat_map(|shard| {
                shard
                    .read()
                    .values()
                    .filter(|e| e.tenant_id == tenant_id && !e.is_expired_at(now))
                    .filter(|e| search.is_none_or(|s| e.key.contains(s)))
                    .map(|e| e.view())
                    .collect::<Vec<_>>()
            })
            .collect();
        views.sort_by(|a, b| a.key.cmp(&b.key));
        views
    }

    pub fn remove(&self, tenant_id: TenantId, key: &str) -> bool {
        let shard_key = (tenant_id, key.to_string());
        self.shard(&shard_key).write().remove(&shard_key).is_some()
    }

    /// Remove every entry of a tenant while holding all shard write locks
    pub fn clear_tenant(&self, tenant_id: TenantId) -> usize {
        let mut guards: Vec<RwLockWriteGuard<'_, Shard>> =
            self.shards.iter().map(|shard| shard.write()).collect();
        guards
            .iter_mut()
            .map(|shard| {
                let before = shard.len();
                shard.retain(|(tenant, _), _| *tenant != tenant_id);
                before - shard.len()
            })
            .sum()
    }

    pub fn stats(&self, tenant_id: TenantId) -> CacheStats {
        let now = Instant::now();
        let (total_entries, memory_used_bytes) = self
            .shards
            .iter()
            .map(|shard| {
                shard
                    .read()
                    .values()
                    .filter(|e| e.tenant_id == tenant_id && !e.is_expired_at(now))
                    .fold((0, 0), |(n, bytes), e| (n + 1, bytes + e.size_bytes()))
            })
            .fold((0, 0), |(n, bytes), (sn, sb)| (n + sn, bytes + sb));

        let counters = self.counters(tenant_id);
        let hits = counters.hits.load(Ordering::Relaxed);
        let misses = counters.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            total_entries,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            hits,
            misses,
            memory_used_bytes,
        }
    }

    /// Evict every expired entry; returns how many were removed
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        self.shards
            .iter()
            .map(|shard| {
                let mut shard = shard.write();
                let before = shard.len();
                shard.retain(|_, e| !e.is_expired_at(now));
                before - shard.len()
            })
            .sum()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(CacheLimits::default())
    }
}

/// Whether a request may be answered from, or stored into, the cache
pub fn request_is_cacheable(route: &Route, method: &Method, headers: &HeaderMap) -> bool {
    if !route.cache_enabled {
        return false;
    }
    let rules = &route.cache_bypass_rules;
    if !rules
        .methods
        .iter()
        .any(|m| m.eq_ignore_ascii_case(method.as_str()))
    {
        return false;
    }
    if rules
        .bypass_headers
        .iter()
        .any(|name| headers.contains_key(name.as_str()))
    {
        return false;
    }
    !(rules.respect_cache_control && forbids_cache(headers))
}

/// Whether an upstream response may be stored
pub fn response_is_cacheable(
    route: &Route,
    status: StatusCode,
    headers: &HeaderMap,
    body_len: usize,
    max_body_bytes: usize,
) -> bool {
    let rules = &route.cache_bypass_rules;
    rules.status_codes.contains(&status.as_u16())
        && body_len <= max_body_bytes
        && !(rules.respect_cache_control && forbids_cache(headers))
}
