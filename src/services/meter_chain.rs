//! Meter reading chain.
//!
//! Readings are append-only and ordered by reading_date. Insertion is
//! serialized per meter by locking the meter row, so the "previous
//! reading before date X" queries never see the chain reorder under a
//! concurrent writer.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::MeterReading;
use crate::error::{map_db_error, AppError, AppResult};
use crate::repository::billing as repo;
use crate::services::events;

pub async fn record_reading(
    pool: &PgPool,
    meter_id: Uuid,
    reading_date: NaiveDate,
    value: Decimal,
) -> AppResult<MeterReading> {
    if value < Decimal::ZERO {
        return Err(AppError::InvalidValue(format!(
            "reading value {value} is negative"
        )));
    }

    let mut tx = pool.begin().await.map_err(map_db_error)?;

    let meter = repo::lock_meter(&mut tx, meter_id).await?;
    if !meter.active {
        return Err(AppError::InvalidValue(format!(
            "meter {meter_id} is inactive"
        )));
    }

    // The chain only grows at the tail. Backdated corrections would
    // change the outcome of "latest reading before X" for periods that
    // may already be billed.
    if let Some(latest) = repo::latest_reading(&mut tx, meter_id).await? {
        if reading_date <= latest.reading_date {
            return Err(AppError::OutOfOrder(format!(
                "reading for {reading_date} is not after the latest reading ({})",
                latest.reading_date
            )));
        }
        if value < latest.value {
            tracing::warn!(
                %meter_id,
                previous = %latest.value,
                new = %value,
                "meter value regressed; recording as a reset candidate"
            );
        }
    }

    let reading = repo::insert_reading(&mut tx, meter_id, reading_date, value).await?;
    tx.commit().await.map_err(map_db_error)?;

    tracing::info!(%meter_id, %reading_date, value = %value, "Meter reading recorded");
    events::emit(
        pool,
        events::METER_READING_RECORDED,
        "meter_reading",
        reading.id,
        json!({
            "meter_id": meter_id,
            "reading_date": reading_date,
            "value": value,
        }),
    )
    .await;

    Ok(reading)
}
