//! Data plane of the gateway
//!
//! Request flow: tenant resolution → route match → auth → rate limit →
//! cache → origin selection (health and circuit breaker aware) → forward.

pub mod analytics;
pub mod auth;
pub mod balancer;
pub mod cache;
pub mod circuit_breaker;
pub mod dispatcher;
pub mod error_response;
pub mod headers;
pub mod health;
pub mod matcher;
pub mod middleware;
pub mod middleware_stack;
pub mod origin_state;
pub mod rate_limiter;
pub mod service;
pub mod snapshot;
pub mod types;
pub mod upstream;

pub use dispatcher::{Dispatcher, GatewayContext};
pub use service::GatewayService;
pub use types::{GatewayConfig, GatewayError, GatewayResult, RequestId};
