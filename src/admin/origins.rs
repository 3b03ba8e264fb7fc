//! Origin management handlers

use crate::admin::{AdminState, Caller, DataList, Payload, RecordId};
use crate::domain::{NewOrigin, Origin, OriginId, TenantId};
use crate::gateway::types::GatewayResult;
use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde_json::Value;

pub fn router() -> Router<AdminState> {
    Router::new()
        .route("/origins", get(list_origins).post(create_origin))
        .route(
            "/origins/{id}",
            get(get_origin).patch(update_origin).delete(delete_origin),
        )
        .route("/origins/tenant/{tenant_id}", get(list_tenant_origins))
}

async fn list_origins(
    State(state): State<AdminState>,
    caller: Caller,
) -> GatewayResult<Json<DataList<Origin>>> {
    let tenant_id = caller.tenant()?;
    Ok(Json(state.context().store.list_origins(tenant_id).into()))
}

async fn list_tenant_origins(
    State(state): State<AdminState>,
    caller: Caller,
    RecordId(tenant_id): RecordId,
) -> GatewayResult<Json<DataList<Origin>>> {
    let tenant_id = caller.tenant_matching(TenantId::new(tenant_id))?;
    Ok(Json(state.context().store.list_origins(tenant_id).into()))
}

async fn create_origin(
    State(state): State<AdminState>,
    caller: Caller,
    Payload(new): Payload<NewOrigin>,
) -> GatewayResult<(StatusCode, Json<Origin>)> {
    let tenant_id = caller.tenant()?;
    let origin = state.context().store.create_origin(tenant_id, new)?;
    Ok((StatusCode::CREATED, Json(origin)))
}

async fn get_origin(
    State(state): State<AdminState>,
    caller: Caller,
    RecordId(id): RecordId,
) -> GatewayResult<Json<Origin>> {
    let tenant_id = caller.tenant()?;
    let origin = state
        .context()
        .store
        .get_origin(tenant_id, OriginId::new(id))?;
    Ok(Json(origin))
}

async fn update_origin(
    State(state): State<AdminState>,
    caller: Caller,
    RecordId(id): RecordId,
    Payload(patch): Payload<Value>,
) -> GatewayResult<Json<Origin>> {
    let tenant_id = caller.tenant()?;
    let origin = state
        .context()
        .store
        .update_origin(tenant_id, OriginId::new(id), &patch)?;
    Ok(Json(origin))
}

async fn delete_origin(
    State(state): State<AdminState>,
    caller: Caller,
    RecordId(id): RecordId,
) -> GatewayResult<StatusCode> {
    let tenant_id = caller.tenant()?;
    state
        .context()
        .store
        .delete_origin(tenant_id, OriginId::new(id))?;
    Ok(StatusCode::NO_CONTENT)
}
