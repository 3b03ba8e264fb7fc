//! Cache inspection and invalidation handlers

use crate::admin::{AdminState, Caller, DataList};
use crate::gateway::cache::{CacheEntryView, CacheStats};
use crate::gateway::types::{GatewayError, GatewayResult};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

pub fn router() -> Router<AdminState> {
    Router::new()
        .route("/cache/entries", get(list_entries))
        .route("/cache/entries/{*key}", delete(delete_entry))
        .route("/cache/clear", delete(clear_cache))
        .route("/cache/stats", get(cache_stats))
}

#[derive(Debug, Default, Deserialize)]
pub struct EntryQuery {
    /// Case-sensitive substring of the cache key
    #[serde(default)]
    pub search: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub cleared: usize,
}

async fn list_entries(
    State(state): State<AdminState>,
    caller: Caller,
    Query(query): Query<EntryQuery>,
) -> GatewayResult<Json<DataList<CacheEntryView>>> {
    let tenant_id = caller.tenant()?;
    let search = query.search.as_deref().filter(|s| !s.is_empty());
    Ok(Json(state.context().cache.list(tenant_id, search).into()))
}

/// The key arrives percent-encoded and may itself contain `/`
async fn delete_entry(
    State(state): State<AdminState>,
    caller: Caller,
    Path(key): Path<String>,
) -> GatewayResult<StatusCode> {
    let tenant_id = caller.tenant()?;
    if !state.context().cache.remove(tenant_id, &key) {
        return Err(GatewayError::not_found("Cache entry"));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn clear_cache(
    State(state): State<AdminState>,
    caller: Caller,
) -> GatewayResult<Json<ClearResponse>> {
    let tenant_id = caller.tenant()?;
    let cleared = state.context().cache.clear_tenant(tenant_id);
    info!(tenant_id = %tenant_id, cleared, "Tenant cache cleared");
    Ok(Json(ClearResponse { cleared }))
}

async fn cache_stats(
    State(state): State<AdminState>,
    caller: Caller,
) -> GatewayResult<Json<CacheStats>> {
    let tenant_id = caller.tenant()?;
    Ok(Json(state.context().cache.stats(tenant_id)))
}
