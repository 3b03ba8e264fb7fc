//! Log message constants for gateway components
//!
//! Lifecycle and operational log text lives here so that messages stay
//! consistent across listeners and background tasks. Structured fields are
//! attached at the call site.

/// Application startup and lifecycle messages
pub mod application {
    pub const STARTING: &str = "Starting VantageEdge gateway";
    pub const STARTED_SUCCESSFULLY: &str = "Application started successfully";
    pub const LOADING_SEED: &str = "Loading configuration seed file";
    pub const GATEWAY_LISTENING: &str = "Data plane listening";
    pub const MANAGEMENT_LISTENING: &str = "Management API listening";
    pub const SHUTDOWN_SIGNAL: &str = "Shutdown signal received";
    pub const STOPPED: &str = "Application stopped";
}

/// Config store messages
pub mod store {
    pub const SNAPSHOT_PUBLISHED: &str = "Published configuration snapshot";
    pub const TENANT_CREATED: &str = "Tenant created";
    pub const TENANT_DELETED: &str = "Tenant deleted with its origins, routes and keys";
    pub const ORIGIN_CREATED: &str = "Origin created";
    pub const ROUTE_CREATED: &str = "Route created";
    pub const API_KEY_CREATED: &str = "API key issued";
    pub const SEED_LOADED: &str = "Seed configuration loaded";
}

/// Data-plane request processing messages
pub mod dispatch {
    pub const REQUEST_COMPLETED: &str = "Gateway request completed";
    pub const REQUEST_REJECTED: &str = "Gateway request rejected";
    pub const UPSTREAM_ATTEMPT_FAILED: &str = "Upstream attempt failed";
    pub const RETRYING: &str = "Retrying upstream request";
    pub const CACHE_HIT: &str = "Served from cache";
    pub const CACHE_SKIPPED_OVERSIZED: &str = "Response exceeds the cacheable size; streaming uncached";
}

/// Authentication messages; never include secrets
pub mod auth {
    pub const MISSING_CREDENTIALS: &str = "Request is missing required credentials";
    pub const INVALID_JWT: &str = "JWT rejected";
    pub const INVALID_API_KEY: &str = "API key rejected";
    pub const INSUFFICIENT_SCOPE: &str = "Token lacks the scope for this management call";
}

/// Origin health and circuit breaker messages
pub mod health {
    pub const MONITOR_STARTED: &str = "Origin health monitor started";
    pub const MONITOR_STOPPED: &str = "Origin health monitor stopped";
    pub const PROBE_STARTED: &str = "Health probe task started";
    pub const PROBE_STOPPED: &str = "Health probe task stopped";
    pub const ORIGIN_UNHEALTHY: &str = "Origin marked unhealthy";
    pub const ORIGIN_RECOVERED: &str = "Origin marked healthy";
    pub const BREAKER_OPENED: &str = "Circuit breaker opened";
    pub const BREAKER_HALF_OPEN: &str = "Circuit breaker admitting trial request";
    pub const BREAKER_CLOSED: &str = "Circuit breaker closed";
}

/// Background maintenance messages
pub mod maintenance {
    pub const SWEEPER_STARTED: &str = "Background sweeper started";
    pub const CACHE_SWEPT: &str = "Expired cache entries evicted";
    pub const RATE_LIMITS_SWEPT: &str = "Idle rate limit state reclaimed";
}
