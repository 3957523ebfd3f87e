//! Payment allocation.
//!
//! The sole writer of `Invoice.paid_amount`. Every mutation is one
//! atomic read-modify-write: lock the invoice row, run the pure ledger
//! transition, persist payment and invoice together. Two concurrent
//! partial payments therefore serialize; the second sees the updated
//! remaining amount and either succeeds or gets `Overpayment`.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{Invoice, Payment};
use crate::error::{map_db_error, AppResult};
use crate::repository::billing as repo;
use crate::services::{events, ledger};

pub struct RecordPayment<'a> {
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub payment_date: NaiveDate,
    pub notes: Option<&'a str>,
    /// Caller-supplied key making retries safe: replaying a key returns
    /// the originally recorded payment instead of applying funds twice.
    pub idempotency_key: Option<&'a str>,
}

pub async fn record_payment(pool: &PgPool, input: RecordPayment<'_>) -> AppResult<Payment> {
    let mut tx = pool.begin().await.map_err(map_db_error)?;
    let invoice = repo::lock_invoice(&mut tx, input.invoice_id).await?;

    if let Some(key) = input.idempotency_key {
        if let Some(existing) = repo::find_payment_by_key(&mut tx, input.invoice_id, key).await? {
            tx.commit().await.map_err(map_db_error)?;
            tracing::info!(
                invoice_id = %input.invoice_id,
                payment_id = %existing.id,
                "Replayed idempotency key, returning recorded payment"
            );
            return Ok(existing);
        }
    }

    let (new_paid, new_status) = ledger::apply_payment(&invoice, input.amount)?;

    let payment = repo::insert_payment(
        &mut tx,
        input.invoice_id,
        input.amount,
        input.payment_date,
        input.notes,
        input.idempotency_key,
    )
    .await?;
    let updated = repo::update_invoice_allocation(&mut tx, invoice.id, new_paid, new_status).await?;
    tx.commit().await.map_err(map_db_error)?;

    tracing::info!(
        invoice_id = %invoice.id,
        payment_id = %payment.id,
        amount = %input.amount,
        remaining = %updated.remaining_amount(),
        status = updated.status.as_str(),
        "Payment recorded"
    );
    events::emit(
        pool,
        events::PAYMENT_RECORDED,
        "payment",
        payment.id,
        json!({
            "invoice_id": invoice.id,
            "amount": input.amount,
            "remaining_amount": updated.remaining_amount(),
            "invoice_status": updated.status,
        }),
    )
    .await;

    Ok(payment)
}

/// Remove a payment and roll its amount back off the invoice. A Paid
/// invoice with a balance again reverts to Posted.
pub async fn delete_payment(pool: &PgPool, payment_id: Uuid) -> AppResult<Invoice> {
    let mut tx = pool.begin().await.map_err(map_db_error)?;
    let payment = repo::get_payment(&mut tx, payment_id).await?;
    let invoice = repo::lock_invoice(&mut tx, payment.invoice_id).await?;

    let (new_paid, new_status) = ledger::reverse_payment(&invoice, payment.amount);

    if repo::delete_payment_row(&mut tx, payment_id).await? == 0 {
        return Err(crate::error::AppError::NotFound(format!(
            "Payment {payment_id} not found."
        )));
    }
    let updated = repo::update_invoice_allocation(&mut tx, invoice.id, new_paid, new_status).await?;
    tx.commit().await.map_err(map_db_error)?;

    tracing::info!(
        invoice_id = %invoice.id,
        %payment_id,
        amount = %payment.amount,
        status = updated.status.as_str(),
        "Payment reversed"
    );
    events::emit(
        pool,
        events::PAYMENT_REVERSED,
        "payment",
        payment_id,
        json!({
            "invoice_id": invoice.id,
            "amount": payment.amount,
            "invoice_status": updated.status,
        }),
    )
    .await;

    Ok(updated)
}
