//! Domain records for the gateway
//!
//! Tenants own origins, routes and API keys. Every record here is validated
//! on construction and on patch, so the data plane only ever sees
//! well-formed configuration.

pub mod api_key;
pub mod cache_key;
pub mod identifiers;
pub mod origin;
pub mod patch;
pub mod pattern;
pub mod route;
pub mod tenant;
pub mod types;

pub use api_key::{ApiKey, ApiKeyEntry, IssuedApiKey, NewApiKey};
pub use identifiers::{ApiKeyId, OriginId, RouteId, TenantId};
pub use origin::{NewOrigin, Origin};
pub use route::{
    AuthMode, CacheBypassRules, LoadBalancing, NewRoute, RateLimitAlgorithm,
    RateLimitKeyStrategy, Route,
};
pub use tenant::{NewTenant, Tenant, TenantStatus};
pub use types::{OriginUrl, Subdomain, ValidationError, Weight};
