//! Route management handlers

use crate::admin::{AdminState, Caller, DataList, Payload, RecordId};
use crate::domain::{NewRoute, Route, RouteId, TenantId};
use crate::gateway::types::GatewayResult;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::Value;

pub fn router() -> Router<AdminState> {
    Router::new()
        .route("/routes", get(list_routes).post(create_route))
        .route(
            "/routes/{id}",
            get(get_route).patch(update_route).delete(delete_route),
        )
        .route("/routes/tenant/{tenant_id}", get(list_tenant_routes))
}

async fn list_routes(
    State(state): State<AdminState>,
    caller: Caller,
) -> GatewayResult<Json<DataList<Route>>> {
    let tenant_id = caller.tenant()?;
    Ok(Json(state.context().store.list_routes(tenant_id).into()))
}

async fn list_tenant_routes(
    State(state): State<AdminState>,
    caller: Caller,
    RecordId(tenant_id): RecordId,
) -> GatewayResult<Json<DataList<Route>>> {
    let tenant_id = caller.tenant_matching(TenantId::new(tenant_id))?;
    Ok(Json(state.context().store.list_routes(tenant_id).into()))
}

async fn create_route(
    State(state): State<AdminState>,
    caller: Caller,
    Payload(new): Payload<NewRoute>,
) -> GatewayResult<(StatusCode, Json<Route>)> {
    let tenant_id = caller.tenant()?;
    let route = state.context().store.create_route(tenant_id, new)?;
    Ok((StatusCode::CREATED, Json(route)))
}

async fn get_route(
    State(state): State<AdminState>,
    caller: Caller,
    RecordId(id): RecordId,
) -> GatewayResult<Json<Route>> {
    let tenant_id = caller.tenant()?;
    Ok(Json(
        state.context().store.get_route(tenant_id, RouteId::new(id))?,
    ))
}

/// Partial update; toggling `is_active` is the common case
async fn update_route(
    State(state): State<AdminState>,
    caller: Caller,
    RecordId(id): RecordId,
    Payload(patch): Payload<Value>,
) -> GatewayResult<Json<Route>> {
    let tenant_id = caller.tenant()?;
    let route = state
        .context()
        .store
        .update_route(tenant_id, RouteId::new(id), &patch)?;
    Ok(Json(route))
}

async fn delete_route(
    State(state): State<AdminState>,
    caller: Caller,
    RecordId(id): RecordId,
) -> GatewayResult<StatusCode> {
    let tenant_id = caller.tenant()?;
    state
        .context()
        .store
        .delete_route(tenant_id, RouteId::new(id))?;
    Ok(StatusCode::NO_CONTENT)
}
