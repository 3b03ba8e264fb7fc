//! Type definitions shared across the gateway

use crate::domain::ValidationError;
use http::HeaderMap;
use nutype::nutype;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use super::headers::X_REQUEST_ID;

/// Request ID used to correlate logs, error bodies and upstream calls
#[nutype(derive(
    Clone,
    Copy,
    Debug,
    Display,
    PartialEq,
    Eq,
    Hash,
    Deserialize,
    Serialize,
    AsRef
))]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn generate() -> Self {
        Self::new(Uuid::now_v7())
    }

    /// Reuse a well-formed `X-Request-Id` from the caller, if any
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get(X_REQUEST_ID)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .map(Self::new)
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::generate()
    }
}

/// Errors surfaced by the gateway, each mapped to a status and error code
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Tenant unavailable: {0}")]
    TenantUnavailable(String),

    #[error("Rate limited; retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Upstream timeout after {0:?}")]
    UpstreamTimeout(Duration),

    #[error("Upstream error: {0}")]
    UpstreamError(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Request body exceeds {max_size} bytes")]
    RequestTooLarge { max_size: usize },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }

    /// Whether the failure should count against an origin's circuit breaker
    pub fn is_upstream_failure(&self) -> bool {
        matches!(self, Self::UpstreamTimeout(_) | Self::UpstreamError(_))
    }
}

impl From<ValidationError> for GatewayError {
    fn from(e: ValidationError) -> Self {
        Self::Config(e.to_string())
    }
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Data-plane settings the dispatcher needs on every request
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Tenants are addressed as `<subdomain>.<base_domain>`
    pub base_domain: String,
    /// Accept `X-Tenant-Id` when the host does not name a tenant
    pub allow_tenant_header: bool,
    pub max_request_body_bytes: usize,
    pub max_cacheable_body_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_domain: "gateway.local".to_string(),
            allow_tenant_header: true,
            max_request_body_bytes: 10 * 1024 * 1024,
            max_cacheable_body_bytes: 1024 * 1024,
        }
    }
}
