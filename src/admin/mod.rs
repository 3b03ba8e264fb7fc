//! Management API
//!
//! Tenant-scoped CRUD over the config store plus cache and analytics
//! inspection. Everything lives under `/api/v1` and requires a bearer JWT
//! whose `tenant_id` claim names the caller's tenant and whose role scopes
//! grant management access; `/health` is open.

pub mod analytics;
pub mod api_keys;
pub mod cache;
pub mod extract;
pub mod origins;
pub mod routes;
pub mod tenants;

use crate::gateway::headers::paths;
use crate::gateway::middleware_stack::MiddlewareStack;
use crate::gateway::types::GatewayError;
use crate::gateway::GatewayContext;
use axum::{extract::State, routing::get, Json, Router};
use derive_more::From;
use serde::Serialize;

pub use extract::{Authenticated, Caller, Payload, RecordId};

/// State shared by every management handler
#[derive(Clone)]
pub struct AdminState {
    context: GatewayContext,
}

impl AdminState {
    pub fn new(context: GatewayContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &GatewayContext {
        &self.context
    }
}

/// Collection responses are wrapped as `{"data": [...]}`
#[derive(Debug, Serialize, From)]
pub struct DataList<T> {
    pub data: Vec<T>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    config_version: u64,
}

async fn health(State(state): State<AdminState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        config_version: state.context().store.version(),
    })
}

async fn not_found() -> GatewayError {
    GatewayError::not_found("Endpoint")
}

/// Management listener service
pub struct ManagementService {
    state: AdminState,
}

impl ManagementService {
    pub fn new(context: GatewayContext) -> Self {
        Self {
            state: AdminState::new(context),
        }
    }

    /// Create the Axum router for the management API with middleware
    pub fn into_router(self) -> Router {
        let api = Router::new()
            .merge(tenants::router())
            .merge(origins::router())
            .merge(routes::router())
            .merge(api_keys::router())
            .merge(cache::router())
            .merge(analytics::router());

        let router = Router::new()
            .route(paths::HEALTH, get(health))
            .nest(paths::API_PREFIX, api)
            .fallback(not_found)
            .with_state(self.state);
        MiddlewareStack::management().apply_to_router(router)
    }
}
