//! Tenant handlers
//!
//! Sign-up accepts any valid token, whatever its role. A token carrying a
//! `tenant_id` claim creates exactly that tenant; otherwise a fresh id is
//! generated.

use crate::admin::{AdminState, Authenticated, Caller, Payload, RecordId};
use crate::domain::{NewTenant, Tenant, TenantId};
use crate::gateway::types::GatewayResult;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use tracing::info;

pub fn router() -> Router<AdminState> {
    Router::new()
        .route("/tenants", post(create_tenant))
        .route(
            "/tenants/{id}",
            get(get_tenant).patch(update_tenant).delete(delete_tenant),
        )
}

async fn create_tenant(
    State(state): State<AdminState>,
    Authenticated(claims): Authenticated,
    Payload(new): Payload<NewTenant>,
) -> GatewayResult<(StatusCode, Json<Tenant>)> {
    let id = claims.tenant().unwrap_or_else(TenantId::generate);
    let tenant = state.context().store.create_tenant(id, new)?;
    Ok((StatusCode::CREATED, Json(tenant)))
}

async fn get_tenant(
    State(state): State<AdminState>,
    caller: Caller,
    RecordId(id): RecordId,
) -> GatewayResult<Json<Tenant>> {
    let tenant_id = caller.tenant_matching(TenantId::new(id))?;
    Ok(Json(state.context().store.get_tenant(tenant_id)?))
}

async fn update_tenant(
    State(state): State<AdminState>,
    caller: Caller,
    RecordId(id): RecordId,
    Payload(patch): Payload<Value>,
) -> GatewayResult<Json<Tenant>> {
    let tenant_id = caller.tenant_matching(TenantId::new(id))?;
    Ok(Json(state.context().store.update_tenant(tenant_id, &patch)?))
}

/// Soft delete; owned records, cached responses and analytics go with it
async fn delete_tenant(
    State(state): State<AdminState>,
    caller: Caller,
    RecordId(id): RecordId,
) -> GatewayResult<StatusCode> {
    let tenant_id = caller.tenant_matching(TenantId::new(id))?;
    let context = state.context();
    context.store.delete_tenant(tenant_id)?;
    let evicted = context.cache.clear_tenant(tenant_id);
    context.analytics.forget(tenant_id);
    info!(tenant_id = %tenant_id, evicted, "Tenant runtime state released");
    Ok(StatusCode::NO_CONTENT)
}
