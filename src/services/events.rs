//! Domain events outbox.
//!
//! The core never delivers notifications itself; it appends events to
//! `domain_events` for an external dispatcher to drain. Emission runs
//! after the business write has committed and a failure here is logged
//! but never fails the request.

use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

pub const INVOICE_GENERATED: &str = "invoice.generated";
pub const INVOICE_POSTED: &str = "invoice.posted";
pub const INVOICE_CANCELLED: &str = "invoice.cancelled";
pub const INVOICE_OVERDUE: &str = "invoice.overdue";
pub const PAYMENT_RECORDED: &str = "payment.recorded";
pub const PAYMENT_REVERSED: &str = "payment.reversed";
pub const METER_READING_RECORDED: &str = "meter.reading_recorded";

pub async fn emit(
    pool: &PgPool,
    event_type: &str,
    entity_type: &str,
    entity_id: Uuid,
    payload: Value,
) {
    let result = sqlx::query(
        "INSERT INTO domain_events (event_type, entity_type, entity_id, payload)
         VALUES ($1, $2, $3, $4)",
    )
    .bind(event_type)
    .bind(entity_type)
    .bind(entity_id)
    .bind(payload)
    .execute(pool)
    .await;

    if let Err(e) = result {
        tracing::warn!(
            event_type,
            entity_type,
            %entity_id,
            error = %e,
            "Failed to record domain event"
        );
    }
}

/// Whether an event of this type already exists for the entity today.
/// Keeps sweeps like the overdue scan from emitting duplicates.
pub async fn emitted_today(pool: &PgPool, event_type: &str, entity_id: Uuid) -> bool {
    let row: Result<Option<(i32,)>, _> = sqlx::query_as(
        "SELECT 1 FROM domain_events
         WHERE event_type = $1 AND entity_id = $2
           AND created_at::date = CURRENT_DATE
         LIMIT 1",
    )
    .bind(event_type)
    .bind(entity_id)
    .fetch_optional(pool)
    .await;

    matches!(row, Ok(Some(_)))
}
