use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use crate::error::AppResult;
use crate::middleware::security::require_internal_api_key;
use crate::services::overdue;
use crate::state::AppState;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route(
        "/admin/overdue-sweep",
        axum::routing::post(run_overdue_sweep),
    )
}

/// Triggered by an external scheduler (cron, workflow engine); the
/// core itself never schedules billing runs.
async fn run_overdue_sweep(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_internal_api_key(&state, &headers)?;
    let pool = state.pool()?;
    let result = overdue::run_overdue_sweep(pool).await;
    Ok(Json(json!(result)))
}
