use crate::domain::cache_key::CacheKeyTemplate;
use crate::domain::identifiers::{OriginId, RouteId, TenantId};
use crate::domain::patch::{merge_patch, require_object};
use crate::domain::pattern::PathPattern;
use crate::domain::tenant::empty_object;
use crate::domain::types::{require_name, require_positive, ValidationError};
use chrono::{DateTime, Utc};
use http::{HeaderName, HeaderValue, Method};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Defaults applied when a route is created without explicit values
pub mod defaults {
    pub const METHOD: &str = "GET";
    pub const RATE_LIMIT_RPS: u32 = 100;
    pub const RATE_LIMIT_BURST: u32 = 100;
    pub const CACHE_TTL_SECS: u64 = 60;
    pub const CACHE_KEY_PATTERN: &str = "{tenant}:{method}:{path}?{query}";
    pub const TIMEOUT_SECS: u64 = 30;
    pub const CIRCUIT_BREAKER_THRESHOLD: u32 = 5;
    /// Matches every request method
    pub const ANY_METHOD: &str = "ANY";
}

/// Credentials a route demands before forwarding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    #[default]
    Public,
    JwtRequired,
    ApikeyRequired,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAlgorithm {
    #[default]
    TokenBucket,
    SlidingWindow,
}

/// What a rate-limit bucket is keyed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitKeyStrategy {
    Tenant,
    ApiKey,
    #[default]
    Ip,
    Route,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancing {
    #[default]
    WeightedRoundRobin,
    LeastConnections,
    ConsistentHash,
}

/// Rules deciding whether a request/response pair may use the cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheBypassRules {
    /// Methods whose responses are cacheable
    pub methods: Vec<String>,
    /// Any of these request headers present bypasses the cache
    pub bypass_headers: Vec<String>,
    /// Honour `Cache-Control: no-cache` / `no-store` on the request
    pub respect_cache_control: bool,
    /// Response statuses that may be stored
    pub status_codes: Vec<u16>,
}

impl Default for CacheBypassRules {
    fn default() -> Self {
        Self {
            methods: vec!["GET".to_string(), "HEAD".to_string()],
            bypass_headers: Vec::new(),
            respect_cache_control: true,
            status_codes: vec![200],
        }
    }
}

/// A tenant's mapping from (methods, path pattern) to an origin pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: RouteId,
    pub tenant_id: TenantId,
    pub origin_id: OriginId,
    #[serde(default)]
    pub origin_pool: Vec<OriginId>,
    pub name: String,
    pub path_pattern: String,
    pub methods: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub auth_mode: AuthMode,
    pub is_active: bool,

    pub rate_limit_enabled: bool,
    pub rate_limit_requests_per_second: u32,
    pub rate_limit_burst: u32,
    #[serde(default)]
    pub rate_limit_algorithm: RateLimitAlgorithm,
    #[serde(default)]
    pub rate_limit_key_strategy: RateLimitKeyStrategy,

    pub cache_enabled: bool,
    pub cache_ttl_seconds: u64,
    pub cache_key_pattern: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub cache_bypass_rules: CacheBypassRules,

    #[serde(default)]
    pub request_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub response_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub path_rewrite_pattern: Option<String>,
    #[serde(default)]
    pub path_rewrite_target: Option<String>,

    pub timeout_seconds: u64,
    #[serde(default)]
    pub retry_attempts: u32,
    pub circuit_breaker_enabled: bool,
    pub circuit_breaker_threshold: u32,
    #[serde(default)]
    pub load_balancing: LoadBalancing,

    #[serde(default = "empty_object")]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRoute {
    pub origin_id: OriginId,
    #[serde(default)]
    pub origin_pool: Vec<OriginId>,
    pub name: String,
    pub path_pattern: String,
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub auth_mode: AuthMode,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub rate_limit_enabled: bool,
    #[serde(default = "default_rps")]
    pub rate_limit_requests_per_second: u32,
    #[serde(default = "default_burst")]
    pub rate_limit_burst: u32,
    #[serde(default)]
    pub rate_limit_algorithm: RateLimitAlgorithm,
    #[serde(default)]
    pub rate_limit_key_strategy: RateLimitKeyStrategy,
    #[serde(default)]
    pub cache_enabled: bool,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,
    #[serde(default = "default_cache_key_pattern")]
    pub cache_key_pattern: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub cache_bypass_rules: CacheBypassRules,
    #[serde(default)]
    pub request_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub response_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub path_rewrite_pattern: Option<String>,
    #[serde(default)]
    pub path_rewrite_target: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub retry_attempts: u32,
    #[serde(default)]
    pub circuit_breaker_enabled: bool,
    #[serde(default = "default_breaker_threshold")]
    pub circuit_breaker_threshold: u32,
    #[serde(default)]
    pub load_balancing: LoadBalancing,
    #[serde(default = "empty_object")]
    pub metadata: Value,
}

fn default_methods() -> Vec<String> {
    vec![defaults::METHOD.to_string()]
}

fn default_true() -> bool {
    true
}

fn default_rps() -> u32 {
    defaults::RATE_LIMIT_RPS
}

fn default_burst() -> u32 {
    defaults::RATE_LIMIT_BURST
}

fn default_cache_ttl() -> u64 {
    defaults::CACHE_TTL_SECS
}

fn default_cache_key_pattern() -> String {
    defaults::CACHE_KEY_PATTERN.to_string()
}

fn default_timeout() -> u64 {
    defaults::TIMEOUT_SECS
}

fn default_breaker_threshold() -> u32 {
    defaults::CIRCUIT_BREAKER_THRESHOLD
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl NewRoute {
    /// A route with every optional field at its default
    pub fn new(
        name: impl Into<String>,
        path_pattern: impl Into<String>,
        origin_id: OriginId,
    ) -> Self {
        Self {
            origin_id,
            origin_pool: Vec::new(),
            name: name.into(),
            path_pattern: path_pattern.into(),
            methods: default_methods(),
            priority: 0,
            auth_mode: AuthMode::default(),
            is_active: true,
            rate_limit_enabled: false,
            rate_limit_requests_per_second: default_rps(),
            rate_limit_burst: default_burst(),
            rate_limit_algorithm: RateLimitAlgorithm::default(),
            rate_limit_key_strategy: RateLimitKeyStrategy::default(),
            cache_enabled: false,
            cache_ttl_seconds: default_cache_ttl(),
            cache_key_pattern: default_cache_key_pattern(),
            cache_bypass_rules: CacheBypassRules::default(),
            request_headers: BTreeMap::new(),
            response_headers: BTreeMap::new(),
            path_rewrite_pattern: None,
            path_rewrite_target: None,
            timeout_seconds: default_timeout(),
            retry_attempts: 0,
            circuit_breaker_enabled: false,
            circuit_breaker_threshold: default_breaker_threshold(),
            load_balancing: LoadBalancing::default(),
            metadata: empty_object(),
        }
    }
}

const PROTECTED_FIELDS: &[&str] = &["id", "tenant_id", "created_at", "updated_at"];

impl Route {
    pub fn create(tenant_id: TenantId, new: NewRoute) -> Result<Self, ValidationError> {
        let now = Utc::now();
        let route = Self {
            id: RouteId::generate(),
            tenant_id,
            origin_id: new.origin_id,
            origin_pool: new.origin_pool,
            name: new.name,
            path_pattern: new.path_pattern,
            methods: new.methods,
            priority: new.priority,
            auth_mode: new.auth_mode,
            is_active: new.is_active,
            rate_limit_enabled: new.rate_limit_enabled,
            rate_limit_requests_per_second: new.rate_limit_requests_per_second,
            rate_limit_burst: new.rate_limit_burst,
            rate_limit_algorithm: new.rate_limit_algorithm,
            rate_limit_key_strategy: new.rate_limit_key_strategy,
            cache_enabled: new.cache_enabled,
            cache_ttl_seconds: new.cache_ttl_seconds,
            cache_key_pattern: new.cache_key_pattern,
            cache_bypass_rules: new.cache_bypass_rules,
            request_headers: new.request_headers,
            response_headers: new.response_headers,
            path_rewrite_pattern: new.path_rewrite_pattern,
            path_rewrite_target: new.path_rewrite_target,
            timeout_seconds: new.timeout_seconds,
            retry_attempts: new.retry_attempts,
            circuit_breaker_enabled: new.circuit_breaker_enabled,
            circuit_breaker_threshold: new.circuit_breaker_threshold,
            load_balancing: new.load_balancing,
            metadata: new.metadata,
            created_at: now,
            updated_at: now,
        };
        route.validated()
    }

    pub fn patched(&self, patch: &Value) -> Result<Self, ValidationError> {
        let mut updated = merge_patch(self, patch, PROTECTED_FIELDS)?;
        updated.updated_at = Utc::now();
        updated.validated()
    }

    /// Normalize and check every field; run on create, patch and seed load
    pub fn validated(mut self) -> Result<Self, ValidationError> {
        self.name = require_name("name", &self.name)?;
        self.path_pattern = PathPattern::parse(&self.path_pattern)?.to_string();
        self.methods = normalize_methods(&self.methods)?;
        if self.methods.is_empty() {
            return Err(ValidationError::new("methods", "must not be empty"));
        }
        self.cache_bypass_rules.methods = normalize_methods(&self.cache_bypass_rules.methods)?;
        CacheKeyTemplate::parse(&self.cache_key_pattern)?;

        if self.rate_limit_requests_per_second == 0 {
            return Err(ValidationError::new(
                "rate_limit_requests_per_second",
                "must be greater than zero",
            ));
        }
        if self.rate_limit_burst == 0 {
            return Err(ValidationError::new(
                "rate_limit_burst",
                "must be greater than zero",
            ));
        }
        if self.circuit_breaker_threshold == 0 {
            return Err(ValidationError::new(
                "circuit_breaker_threshold",
                "must be greater than zero",
            ));
        }
        require_positive("cache_ttl_seconds", self.cache_ttl_seconds)?;
        require_positive("timeout_seconds", self.timeout_seconds)?;
        validate_headers("request_headers", &self.request_headers)?;
        validate_headers("response_headers", &self.response_headers)?;

        self.path_rewrite_pattern = non_blank(self.path_rewrite_pattern.take());
        self.path_rewrite_target = non_blank(self.path_rewrite_target.take());
        match (&self.path_rewrite_pattern, &self.path_rewrite_target) {
            (Some(pattern), Some(_)) => {
                Regex::new(pattern).map_err(|e| {
                    ValidationError::new("path_rewrite_pattern", format!("invalid regex: {e}"))
                })?;
            }
            (Some(_), None) => {
                return Err(ValidationError::new(
                    "path_rewrite_target",
                    "required when path_rewrite_pattern is set",
                ))
            }
            (None, _) => {}
        }

        let primary = self.origin_id;
        let mut seen = Vec::with_capacity(self.origin_pool.len());
        self.origin_pool.retain(|id| {
            let keep = *id != primary && !seen.contains(id);
            seen.push(*id);
            keep
        });
        require_object("metadata", &self.metadata)?;
        Ok(self)
    }

    /// Every origin the route may forward to, primary first
    pub fn pool(&self) -> Vec<OriginId> {
        let mut pool = Vec::with_capacity(1 + self.origin_pool.len());
        pool.push(self.origin_id);
        for id in &self.origin_pool {
            if !pool.contains(id) {
                pool.push(*id);
            }
        }
        pool
    }

    pub fn references(&self, origin_id: OriginId) -> bool {
        self.origin_id == origin_id || self.origin_pool.contains(&origin_id)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn normalize_methods(methods: &[String]) -> Result<Vec<String>, ValidationError> {
    let mut normalized: Vec<String> = Vec::with_capacity(methods.len());
    for raw in methods {
        let method = raw.trim().to_ascii_uppercase();
        if method != defaults::ANY_METHOD && Method::from_bytes(method.as_bytes()).is_err() {
            return Err(ValidationError::new(
                "methods",
                format!("invalid HTTP method '{raw}'"),
            ));
        }
        if !normalized.contains(&method) {
            normalized.push(method);
        }
    }
    Ok(normalized)
}

fn validate_headers(field: &str, headers: &BTreeMap<String, String>) -> Result<(), ValidationError> {
    for (name, value) in headers {
        HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ValidationError::new(field, format!("invalid header name '{name}'")))?;
        HeaderValue::from_str(value)
            .map_err(|_| ValidationError::new(field, format!("invalid value for '{name}'")))?;
    }
    Ok(())
}
