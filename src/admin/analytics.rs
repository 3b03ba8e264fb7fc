//! Traffic analytics handler

use crate::admin::{AdminState, Caller};
use crate::gateway::analytics::AnalyticsReport;
use crate::gateway::types::GatewayResult;
use axum::{extract::State, routing::get, Json, Router};

pub fn router() -> Router<AdminState> {
    Router::new().route("/analytics", get(analytics_report))
}

async fn analytics_report(
    State(state): State<AdminState>,
    caller: Caller,
) -> GatewayResult<Json<AnalyticsReport>> {
    let tenant_id = caller.tenant()?;
    Ok(Json(state.context().analytics.report(tenant_id)))
}
