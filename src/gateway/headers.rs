//! HTTP header constants and helpers for the gateway
//!
//! Header names used on either listener live here so the data plane, the
//! management API and the tests agree on spelling.

use ::http::{header, HeaderMap, HeaderName};

/// Header name for request ID used for tracing and correlation
pub const X_REQUEST_ID: &str = "x-request-id";

/// Header carrying an API key secret
pub const X_API_KEY: &str = "x-api-key";

/// Fallback tenant selector when the host does not name one
pub const X_TENANT_ID: &str = "x-tenant-id";

/// Cache outcome marker on data-plane responses
pub const X_CACHE: &str = "x-cache";
pub const CACHE_HIT: &str = "HIT";
pub const CACHE_MISS: &str = "MISS";

/// Media type of server-sent event streams, which are never buffered
pub const EVENT_STREAM: &str = "text/event-stream";

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_FORWARDED_HOST: &str = "x-forwarded-host";

/// Authorization header prefix for bearer tokens
pub const BEARER_PREFIX: &str = "Bearer ";

/// Standard header re-exports for convenience
pub use header::{
    AUTHORIZATION, CACHE_CONTROL, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST, RETRY_AFTER,
};

/// Connection-scoped headers that must not be forwarded
pub const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Well-known paths
pub mod paths {
    /// Default path when none is specified
    pub const DEFAULT: &str = "/";

    /// Liveness endpoint on the management listener
    pub const HEALTH: &str = "/health";

    /// Prefix of every management endpoint
    pub const API_PREFIX: &str = "/api/v1";
}

/// Remove hop-by-hop headers, including any named by `Connection`
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// The token of an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|value| value.strip_prefix(BEARER_PREFIX))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Request headers carrying `Cache-Control: no-cache` or `no-store`
pub fn forbids_cache(headers: &HeaderMap) -> bool {
    headers
        .get_all(CACHE_CONTROL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|directive| directive.trim().to_ascii_lowercase())
        .any(|directive| directive == "no-cache" || directive == "no-store")
}
