use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};

use crate::{
    error::AppResult,
    repository::billing as repo,
    schemas::{validate_input, InvoiceIdPath, PaymentIdPath, RecordPaymentInput},
    services::allocation,
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/invoices/{invoice_id}/payments",
            axum::routing::post(record_payment).get(list_payments),
        )
        .route(
            "/payments/{payment_id}",
            axum::routing::delete(delete_payment),
        )
}

async fn record_payment(
    State(state): State<AppState>,
    Path(path): Path<InvoiceIdPath>,
    Json(payload): Json<RecordPaymentInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;
    let pool = state.pool()?;

    let payment = allocation::record_payment(
        pool,
        allocation::RecordPayment {
            invoice_id: path.invoice_id,
            amount: payload.amount,
            payment_date: payload.payment_date,
            notes: payload.notes.as_deref(),
            idempotency_key: payload.idempotency_key.as_deref(),
        },
    )
    .await?;

    Ok((axum::http::StatusCode::CREATED, Json(json!(payment))))
}

async fn list_payments(
    State(state): State<AppState>,
    Path(path): Path<InvoiceIdPath>,
) -> AppResult<Json<Value>> {
    let pool = state.pool()?;
    // 404 on an unknown invoice rather than an empty list
    repo::get_invoice(pool, path.invoice_id).await?;
    let payments = repo::list_payments(pool, path.invoice_id).await?;
    Ok(Json(json!({ "data": payments })))
}

async fn delete_payment(
    State(state): State<AppState>,
    Path(path): Path<PaymentIdPath>,
) -> AppResult<Json<Value>> {
    let pool = state.pool()?;
    let invoice = allocation::delete_payment(pool, path.payment_id).await?;
    Ok(Json(json!({
        "deleted": true,
        "invoice_id": invoice.id,
        "paid_amount": invoice.paid_amount,
        "remaining_amount": invoice.remaining_amount(),
        "status": invoice.status,
    })))
}
