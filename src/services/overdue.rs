//! Overdue sweep.
//!
//! Overdue is derived, never stored: a posted invoice past its due
//! date. This sweep runs on an external trigger (there is no scheduler
//! in the core) and emits one `invoice.overdue` event per invoice per
//! day for the notification dispatcher to pick up.

use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::services::events;

/// Counters for one sweep run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OverdueSweepResult {
    pub scanned: u32,
    pub events_emitted: u32,
    pub errors: u32,
}

pub async fn run_overdue_sweep(pool: &PgPool) -> OverdueSweepResult {
    let today = Utc::now().date_naive();
    let mut result = OverdueSweepResult {
        scanned: 0,
        events_emitted: 0,
        errors: 0,
    };

    let invoices = match crate::repository::billing::overdue_invoices(pool, today).await {
        Ok(rows) => rows,
        Err(e) => {
            warn!("Failed to fetch overdue invoices: {e}");
            result.errors += 1;
            return result;
        }
    };

    for invoice in invoices {
        result.scanned += 1;

        if events::emitted_today(pool, events::INVOICE_OVERDUE, invoice.id).await {
            continue;
        }

        events::emit(
            pool,
            events::INVOICE_OVERDUE,
            "invoice",
            invoice.id,
            json!({
                "contract_id": invoice.contract_id,
                "due_date": invoice.due_date,
                "overdue_days": invoice.overdue_days(today),
                "remaining_amount": invoice.remaining_amount(),
                "currency": invoice.currency,
            }),
        )
        .await;
        result.events_emitted += 1;
    }

    info!(
        scanned = result.scanned,
        emitted = result.events_emitted,
        errors = result.errors,
        "Overdue sweep completed"
    );

    result
}
