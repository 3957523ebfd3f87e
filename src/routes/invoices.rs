use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

use crate::{
    domain::BillingPeriod,
    error::AppResult,
    repository::billing as repo,
    schemas::{clamp_limit_in_range, GenerateInvoiceInput, InvoiceIdPath, InvoicesQuery},
    services::{composer, ledger},
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/invoices/generate", axum::routing::post(generate_invoice))
        .route("/invoices", axum::routing::get(list_invoices))
        .route("/invoices/{invoice_id}", axum::routing::get(get_invoice))
        .route(
            "/invoices/{invoice_id}/post",
            axum::routing::post(post_invoice),
        )
        .route(
            "/invoices/{invoice_id}/cancel",
            axum::routing::post(cancel_invoice),
        )
}

/// Run billing for one contract and period. Safe to retry: a repeat
/// for the same (contract, period) answers 409 duplicate_invoice.
async fn generate_invoice(
    State(state): State<AppState>,
    Json(payload): Json<GenerateInvoiceInput>,
) -> AppResult<impl IntoResponse> {
    let pool = state.pool()?;
    let period = BillingPeriod::new(payload.period_start, payload.period_end)?;

    let invoice =
        composer::generate_invoice(pool, &state.config, payload.contract_id, period).await?;
    let lines = repo::get_invoice_lines(pool, invoice.id).await?;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(invoice_view(&invoice, Some(lines))),
    ))
}

async fn get_invoice(
    State(state): State<AppState>,
    Path(path): Path<InvoiceIdPath>,
) -> AppResult<Json<Value>> {
    let pool = state.pool()?;
    let invoice = repo::get_invoice(pool, path.invoice_id).await?;
    let lines = repo::get_invoice_lines(pool, invoice.id).await?;
    Ok(Json(invoice_view(&invoice, Some(lines))))
}

async fn list_invoices(
    State(state): State<AppState>,
    Query(query): Query<InvoicesQuery>,
) -> AppResult<Json<Value>> {
    let pool = state.pool()?;
    let rows = repo::list_invoices(
        pool,
        query.contract_id,
        query.status,
        clamp_limit_in_range(query.limit, 1, 500),
    )
    .await?;

    let data: Vec<Value> = rows.iter().map(|inv| invoice_view(inv, None)).collect();
    Ok(Json(json!({ "data": data })))
}

async fn post_invoice(
    State(state): State<AppState>,
    Path(path): Path<InvoiceIdPath>,
) -> AppResult<Json<Value>> {
    let pool = state.pool()?;
    let invoice = ledger::post_invoice(pool, path.invoice_id).await?;
    Ok(Json(invoice_view(&invoice, None)))
}

async fn cancel_invoice(
    State(state): State<AppState>,
    Path(path): Path<InvoiceIdPath>,
) -> AppResult<Json<Value>> {
    let pool = state.pool()?;
    let invoice = ledger::cancel_invoice(pool, path.invoice_id).await?;
    Ok(Json(invoice_view(&invoice, None)))
}

/// Serialize an invoice with its derived fields. Remaining amount and
/// overdue state are computed, never read from storage.
fn invoice_view(invoice: &crate::domain::Invoice, lines: Option<Vec<crate::domain::InvoiceLine>>) -> Value {
    let today = Utc::now().date_naive();
    let mut view = json!({
        "id": invoice.id,
        "contract_id": invoice.contract_id,
        "period_start": invoice.period_start,
        "period_end": invoice.period_end,
        "status": invoice.status,
        "currency": invoice.currency,
        "total_amount": invoice.total_amount,
        "paid_amount": invoice.paid_amount,
        "remaining_amount": invoice.remaining_amount(),
        "due_date": invoice.due_date,
        "is_overdue": invoice.is_overdue(today),
        "overdue_days": invoice.overdue_days(today),
        "created_at": invoice.created_at,
    });
    if let Some(lines) = lines {
        view["lines"] = json!(lines);
    }
    view
}
