//! API key management handlers
//!
//! The plaintext secret is only ever returned by `POST /api-keys`.

use crate::admin::{AdminState, Caller, DataList, Payload, RecordId};
use crate::domain::{ApiKey, ApiKeyId, IssuedApiKey, NewApiKey, TenantId};
use crate::gateway::types::GatewayResult;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};

pub fn router() -> Router<AdminState> {
    Router::new()
        .route("/api-keys", get(list_api_keys).post(create_api_key))
        .route("/api-keys/{id}", get(get_api_key).delete(delete_api_key))
        .route("/api-keys/tenant/{tenant_id}", get(list_tenant_api_keys))
}

async fn list_api_keys(
    State(state): State<AdminState>,
    caller: Caller,
) -> GatewayResult<Json<DataList<ApiKey>>> {
    let tenant_id = caller.tenant()?;
    Ok(Json(state.context().store.list_api_keys(tenant_id).into()))
}

async fn list_tenant_api_keys(
    State(state): State<AdminState>,
    caller: Caller,
    RecordId(tenant_id): RecordId,
) -> GatewayResult<Json<DataList<ApiKey>>> {
    let tenant_id = caller.tenant_matching(TenantId::new(tenant_id))?;
    Ok(Json(state.context().store.list_api_keys(tenant_id).into()))
}

async fn create_api_key(
    State(state): State<AdminState>,
    caller: Caller,
    Payload(new): Payload<NewApiKey>,
) -> GatewayResult<(StatusCode, Json<IssuedApiKey>)> {
    let tenant_id = caller.tenant()?;
    let issued = state.context().store.create_api_key(tenant_id, new)?;
    Ok((StatusCode::CREATED, Json(issued)))
}

async fn get_api_key(
    State(state): State<AdminState>,
    caller: Caller,
    RecordId(id): RecordId,
) -> GatewayResult<Json<ApiKey>> {
    let tenant_id = caller.tenant()?;
    Ok(Json(
        state
            .context()
            .store
            .get_api_key(tenant_id, ApiKeyId::new(id))?,
    ))
}

async fn delete_api_key(
    State(state): State<AdminState>,
    caller: Caller,
    RecordId(id): RecordId,
) -> GatewayResult<StatusCode> {
    let tenant_id = caller.tenant()?;
    state
        .context()
        .store
        .delete_api_key(tenant_id, ApiKeyId::new(id))?;
    Ok(StatusCode::NO_CONTENT)
}
