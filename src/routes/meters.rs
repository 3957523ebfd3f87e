use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};

use crate::{
    error::AppResult,
    repository::billing as repo,
    schemas::{clamp_limit_in_range, MeterIdPath, ReadingsQuery, RecordReadingInput},
    services::meter_chain,
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route(
        "/meters/{meter_id}/readings",
        axum::routing::post(record_reading).get(list_readings),
    )
}

async fn record_reading(
    State(state): State<AppState>,
    Path(path): Path<MeterIdPath>,
    Json(payload): Json<RecordReadingInput>,
) -> AppResult<impl IntoResponse> {
    let pool = state.pool()?;
    let reading =
        meter_chain::record_reading(pool, path.meter_id, payload.reading_date, payload.value)
            .await?;
    Ok((axum::http::StatusCode::CREATED, Json(json!(reading))))
}

async fn list_readings(
    State(state): State<AppState>,
    Path(path): Path<MeterIdPath>,
    Query(query): Query<ReadingsQuery>,
) -> AppResult<Json<Value>> {
    let pool = state.pool()?;
    // 404 on an unknown meter rather than an empty list
    repo::get_meter(pool, path.meter_id).await?;
    let readings =
        repo::list_readings(pool, path.meter_id, clamp_limit_in_range(query.limit, 1, 1000))
            .await?;
    Ok(Json(json!({ "data": readings })))
}
