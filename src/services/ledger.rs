//! Invoice lifecycle: Draft -> Posted -> Paid, with Draft|Posted ->
//! Cancelled as the alternate terminal branch.
//!
//! Transitions are pure functions over the invoice value; persistence
//! applies them under a row lock so no transition ever races another
//! writer. `Posted -> Paid` and `Paid -> Posted` are never requested by
//! a caller, they fall out of payment allocation.

use rust_decimal::Decimal;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{Invoice, InvoiceStatus};
use crate::error::{map_db_error, AppError, AppResult};
use crate::repository::billing as repo;
use crate::services::events;

/// Outcome of a pure transition: the status to persist, or `None` when
/// the call is an idempotent no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    To(InvoiceStatus),
    NoOp,
}

/// Draft -> Posted. Locks the line list; requires at least one line and
/// a positive total. A draft that was already fully paid comes out of
/// posting as Paid directly.
pub fn post(invoice: &Invoice, line_count: i64) -> AppResult<Transition> {
    match invoice.status {
        InvoiceStatus::Cancelled => Err(AppError::InvoiceCancelled),
        InvoiceStatus::Posted | InvoiceStatus::Paid => Err(AppError::AlreadyPosted),
        InvoiceStatus::Draft => {
            if line_count == 0 || invoice.total_amount <= Decimal::ZERO {
                return Err(AppError::EmptyInvoice);
            }
            if invoice.remaining_amount() == Decimal::ZERO {
                Ok(Transition::To(InvoiceStatus::Paid))
            } else {
                Ok(Transition::To(InvoiceStatus::Posted))
            }
        }
    }
}

/// Draft|Posted -> Cancelled. Payments must be reversed first; an
/// already-cancelled invoice cancels as a no-op.
pub fn cancel(invoice: &Invoice) -> AppResult<Transition> {
    if invoice.status == InvoiceStatus::Cancelled {
        return Ok(Transition::NoOp);
    }
    if invoice.paid_amount > Decimal::ZERO {
        return Err(AppError::CannotCancelPaidInvoice);
    }
    Ok(Transition::To(InvoiceStatus::Cancelled))
}

/// Apply a payment amount. Returns the new paid amount and status.
pub fn apply_payment(invoice: &Invoice, amount: Decimal) -> AppResult<(Decimal, InvoiceStatus)> {
    if invoice.status == InvoiceStatus::Cancelled {
        return Err(AppError::InvoiceCancelled);
    }
    if amount <= Decimal::ZERO {
        return Err(AppError::InvalidAmount(format!(
            "payment amount must be positive, got {amount}"
        )));
    }
    let remaining = invoice.remaining_amount();
    if amount > remaining {
        return Err(AppError::Overpayment(format!(
            "payment of {amount} exceeds remaining {remaining}"
        )));
    }

    let new_paid = invoice.paid_amount + amount;
    let status = if invoice.status == InvoiceStatus::Posted && new_paid == invoice.total_amount {
        InvoiceStatus::Paid
    } else {
        invoice.status
    };
    Ok((new_paid, status))
}

/// Reverse a payment amount. A Paid invoice with a balance again drops
/// back to Posted.
pub fn reverse_payment(invoice: &Invoice, amount: Decimal) -> (Decimal, InvoiceStatus) {
    let new_paid = invoice.paid_amount - amount;
    let status = if invoice.status == InvoiceStatus::Paid && new_paid < invoice.total_amount {
        InvoiceStatus::Posted
    } else {
        invoice.status
    };
    (new_paid, status)
}

// ---------------------------------------------------------------------------
// Persistence wrappers
// ---------------------------------------------------------------------------

pub async fn post_invoice(pool: &PgPool, invoice_id: Uuid) -> AppResult<Invoice> {
    let mut tx = pool.begin().await.map_err(map_db_error)?;
    let invoice = repo::lock_invoice(&mut tx, invoice_id).await?;
    let line_count = repo::count_invoice_lines(&mut tx, invoice_id).await?;

    let updated = match post(&invoice, line_count)? {
        Transition::To(status) => repo::update_invoice_status(&mut tx, invoice_id, status).await?,
        Transition::NoOp => invoice,
    };
    tx.commit().await.map_err(map_db_error)?;

    tracing::info!(%invoice_id, status = updated.status.as_str(), "Invoice posted");
    events::emit(
        pool,
        events::INVOICE_POSTED,
        "invoice",
        invoice_id,
        json!({ "total_amount": updated.total_amount, "due_date": updated.due_date }),
    )
    .await;
    Ok(updated)
}

pub async fn cancel_invoice(pool: &PgPool, invoice_id: Uuid) -> AppResult<Invoice> {
    let mut tx = pool.begin().await.map_err(map_db_error)?;
    let invoice = repo::lock_invoice(&mut tx, invoice_id).await?;

    let (updated, changed) = match cancel(&invoice)? {
        Transition::To(status) => (
            repo::update_invoice_status(&mut tx, invoice_id, status).await?,
            true,
        ),
        Transition::NoOp => (invoice, false),
    };
    tx.commit().await.map_err(map_db_error)?;

    if changed {
        tracing::info!(%invoice_id, "Invoice cancelled");
        events::emit(
            pool,
            events::INVOICE_CANCELLED,
            "invoice",
            invoice_id,
            json!({ "contract_id": updated.contract_id }),
        )
        .await;
    }
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use rust_decimal_macros::dec;

    fn invoice(status: InvoiceStatus, total: Decimal, paid: Decimal) -> Invoice {
        Invoice {
            id: Uuid::new_v4(),
            contract_id: Uuid::new_v4(),
            period_start: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            period_end: NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
            status,
            currency: "EUR".to_string(),
            total_amount: total,
            paid_amount: paid,
            due_date: NaiveDate::from_ymd_opt(2025, 2, 14).unwrap(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn posting_requires_lines_and_positive_total() {
        let inv = invoice(InvoiceStatus::Draft, dec!(100), dec!(0));
        assert!(matches!(post(&inv, 0), Err(AppError::EmptyInvoice)));
        let zero = invoice(InvoiceStatus::Draft, dec!(0), dec!(0));
        assert!(matches!(post(&zero, 2), Err(AppError::EmptyInvoice)));
        assert_eq!(
            post(&inv, 2).unwrap(),
            Transition::To(InvoiceStatus::Posted)
        );
    }

    #[test]
    fn posting_twice_conflicts() {
        let inv = invoice(InvoiceStatus::Posted, dec!(100), dec!(0));
        assert!(matches!(post(&inv, 1), Err(AppError::AlreadyPosted)));
        let paid = invoice(InvoiceStatus::Paid, dec!(100), dec!(100));
        assert!(matches!(post(&paid, 1), Err(AppError::AlreadyPosted)));
        let cancelled = invoice(InvoiceStatus::Cancelled, dec!(100), dec!(0));
        assert!(matches!(post(&cancelled, 1), Err(AppError::InvoiceCancelled)));
    }

    #[test]
    fn cancel_with_balance_is_blocked() {
        let inv = invoice(InvoiceStatus::Posted, dec!(100), dec!(40));
        assert!(matches!(cancel(&inv), Err(AppError::CannotCancelPaidInvoice)));
    }

    #[test]
    fn cancel_draft_without_payments_succeeds() {
        let inv = invoice(InvoiceStatus::Draft, dec!(100), dec!(0));
        assert_eq!(
            cancel(&inv).unwrap(),
            Transition::To(InvoiceStatus::Cancelled)
        );
    }

    #[test]
    fn cancel_is_idempotent() {
        let inv = invoice(InvoiceStatus::Cancelled, dec!(100), dec!(0));
        assert_eq!(cancel(&inv).unwrap(), Transition::NoOp);
    }

    #[test]
    fn partial_then_full_payment_reaches_paid() {
        let inv = invoice(InvoiceStatus::Posted, dec!(1000), dec!(0));
        let (paid, status) = apply_payment(&inv, dec!(600)).unwrap();
        assert_eq!(paid, dec!(600));
        assert_eq!(status, InvoiceStatus::Posted);

        let inv = invoice(InvoiceStatus::Posted, dec!(1000), dec!(600));
        let (paid, status) = apply_payment(&inv, dec!(400)).unwrap();
        assert_eq!(paid, dec!(1000));
        assert_eq!(status, InvoiceStatus::Paid);
    }

    #[test]
    fn paying_more_than_remaining_is_overpayment() {
        let inv = invoice(InvoiceStatus::Paid, dec!(1000), dec!(1000));
        assert!(matches!(
            apply_payment(&inv, dec!(1)),
            Err(AppError::Overpayment(_))
        ));
    }

    #[test]
    fn non_positive_amounts_are_invalid() {
        let inv = invoice(InvoiceStatus::Posted, dec!(1000), dec!(0));
        assert!(matches!(
            apply_payment(&inv, dec!(0)),
            Err(AppError::InvalidAmount(_))
        ));
        assert!(matches!(
            apply_payment(&inv, dec!(-5)),
            Err(AppError::InvalidAmount(_))
        ));
    }

    #[test]
    fn cancelled_invoice_rejects_payments() {
        let inv = invoice(InvoiceStatus::Cancelled, dec!(1000), dec!(0));
        assert!(matches!(
            apply_payment(&inv, dec!(10)),
            Err(AppError::InvoiceCancelled)
        ));
    }

    #[test]
    fn reversal_reopens_a_paid_invoice() {
        let inv = invoice(InvoiceStatus::Paid, dec!(1000), dec!(1000));
        let (paid, status) = reverse_payment(&inv, dec!(400));
        assert_eq!(paid, dec!(600));
        assert_eq!(status, InvoiceStatus::Posted);
    }

    #[test]
    fn reversal_on_posted_keeps_status() {
        let inv = invoice(InvoiceStatus::Posted, dec!(1000), dec!(600));
        let (paid, status) = reverse_payment(&inv, dec!(600));
        assert_eq!(paid, dec!(0));
        assert_eq!(status, InvoiceStatus::Posted);
    }

    #[test]
    fn fully_paid_draft_posts_straight_to_paid() {
        let inv = invoice(InvoiceStatus::Draft, dec!(500), dec!(500));
        assert_eq!(post(&inv, 1).unwrap(), Transition::To(InvoiceStatus::Paid));
    }
}
