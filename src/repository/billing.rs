//! Typed persistence layer for the billing tables.
//!
//! All queries are runtime-bound (`query_as` + `.bind`); row locking
//! (`FOR UPDATE`) and the partial unique index on
//! (contract_id, period_start, period_end) carry the serialization
//! guarantees the billing engine relies on.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::domain::{
    BillingSettings, Contract, Invoice, InvoiceLine, InvoiceStatus, Meter, MeterReading, Payment,
    DraftLine,
};
use crate::error::{map_db_error, AppError, AppResult};

const CONTRACT_COLS: &str =
    "id, organization_id, unit_id, customer_id, rent_type, base_rent_amount, start_date, end_date, active";
const SERVICE_COLS: &str =
    "id, name, kind, default_price, price_per_unit, tax_rate, active";
const METER_COLS: &str = "id, scope, unit_id, service_id, baseline_value, active";
const READING_COLS: &str = "id, meter_id, reading_date, value, recorded_at";
const INVOICE_COLS: &str =
    "id, contract_id, period_start, period_end, status, currency, total_amount, paid_amount, due_date, created_at";
const LINE_COLS: &str =
    "id, invoice_id, position, description, kind, quantity, unit_price, tax_rate, amount";
const PAYMENT_COLS: &str =
    "id, invoice_id, amount, payment_date, notes, idempotency_key, created_at";

// ---------------------------------------------------------------------------
// Collaborator tables (read-only here: contracts, services, meters, settings)
// ---------------------------------------------------------------------------

pub async fn get_contract(pool: &PgPool, contract_id: Uuid) -> AppResult<Contract> {
    sqlx::query_as::<_, Contract>(&format!(
        "SELECT {CONTRACT_COLS} FROM contracts WHERE id = $1"
    ))
    .bind(contract_id)
    .fetch_optional(pool)
    .await
    .map_err(map_db_error)?
    .ok_or_else(|| AppError::NotFound(format!("Contract {contract_id} not found.")))
}

/// Resolve billing settings for an organization, falling back to the
/// environment defaults when no settings row exists.
pub async fn settings_for_org(
    pool: &PgPool,
    config: &AppConfig,
    organization_id: Uuid,
) -> AppResult<BillingSettings> {
    let row: Option<(String, i64, bool, Decimal)> = sqlx::query_as(
        "SELECT currency, due_grace_days, merge_services_with_rent, rent_tax_rate
         FROM organization_billing_settings
         WHERE organization_id = $1",
    )
    .bind(organization_id)
    .fetch_optional(pool)
    .await
    .map_err(map_db_error)?;

    Ok(match row {
        Some((currency, due_grace_days, merge_services_with_rent, rent_tax_rate)) => {
            BillingSettings {
                currency,
                due_grace_days,
                merge_services_with_rent,
                rent_tax_rate,
            }
        }
        None => BillingSettings {
            currency: config.default_currency.clone(),
            due_grace_days: config.default_due_grace_days,
            merge_services_with_rent: config.default_merge_services_with_rent,
            rent_tax_rate: config.default_rent_tax_rate,
        },
    })
}

/// Active fixed-fee services subscribed for a unit, in stable name order.
pub async fn fixed_services_for_unit(
    pool: &PgPool,
    unit_id: Uuid,
) -> AppResult<Vec<crate::domain::ServiceDef>> {
    sqlx::query_as(&format!(
        "SELECT s.{}
         FROM services s
         JOIN unit_services us ON us.service_id = s.id
         WHERE us.unit_id = $1 AND s.active AND s.kind = 'fixed_fee'
         ORDER BY s.name",
        SERVICE_COLS.replace(", ", ", s.")
    ))
    .bind(unit_id)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)
}

/// Active unit-scope meters for a unit, paired with their metered
/// service definition, in stable service-name order.
pub async fn metered_services_for_unit(
    pool: &PgPool,
    unit_id: Uuid,
) -> AppResult<Vec<(Meter, crate::domain::ServiceDef)>> {
    let rows: Vec<MeterWithService> = sqlx::query_as(
        "SELECT m.id AS meter_id, m.scope, m.unit_id, m.service_id, m.baseline_value,
                m.active AS meter_active,
                s.id AS svc_id, s.name, s.kind, s.default_price, s.price_per_unit,
                s.tax_rate, s.active AS svc_active
         FROM meters m
         JOIN services s ON s.id = m.service_id
         WHERE m.unit_id = $1 AND m.scope = 'unit' AND m.active
           AND s.active AND s.kind = 'metered'
         ORDER BY s.name",
    )
    .bind(unit_id)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)?;

    Ok(rows.into_iter().map(MeterWithService::split).collect())
}

#[derive(sqlx::FromRow)]
struct MeterWithService {
    meter_id: Uuid,
    scope: crate::domain::MeterScope,
    unit_id: Option<Uuid>,
    service_id: Uuid,
    baseline_value: Decimal,
    meter_active: bool,
    svc_id: Uuid,
    name: String,
    kind: crate::domain::ServiceKind,
    default_price: Option<Decimal>,
    price_per_unit: Option<Decimal>,
    tax_rate: Decimal,
    svc_active: bool,
}

impl MeterWithService {
    fn split(self) -> (Meter, crate::domain::ServiceDef) {
        (
            Meter {
                id: self.meter_id,
                scope: self.scope,
                unit_id: self.unit_id,
                service_id: self.service_id,
                baseline_value: self.baseline_value,
                active: self.meter_active,
            },
            crate::domain::ServiceDef {
                id: self.svc_id,
                name: self.name,
                kind: self.kind,
                default_price: self.default_price,
                price_per_unit: self.price_per_unit,
                tax_rate: self.tax_rate,
                active: self.svc_active,
            },
        )
    }
}

// ---------------------------------------------------------------------------
// Meter reading chain
// ---------------------------------------------------------------------------

pub async fn get_meter(pool: &PgPool, meter_id: Uuid) -> AppResult<Meter> {
    sqlx::query_as::<_, Meter>(&format!("SELECT {METER_COLS} FROM meters WHERE id = $1"))
        .bind(meter_id)
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?
        .ok_or_else(|| AppError::NotFound(format!("Meter {meter_id} not found.")))
}

/// Lock the meter row so reading insertion is serialized per meter.
pub async fn lock_meter(conn: &mut PgConnection, meter_id: Uuid) -> AppResult<Meter> {
    sqlx::query_as::<_, Meter>(&format!(
        "SELECT {METER_COLS} FROM meters WHERE id = $1 FOR UPDATE"
    ))
    .bind(meter_id)
    .fetch_optional(conn)
    .await
    .map_err(map_db_error)?
    .ok_or_else(|| AppError::NotFound(format!("Meter {meter_id} not found.")))
}

/// Latest reading strictly before `date` (the "previous reading" query).
pub async fn reading_before(
    pool: &PgPool,
    meter_id: Uuid,
    date: NaiveDate,
) -> AppResult<Option<MeterReading>> {
    sqlx::query_as::<_, MeterReading>(&format!(
        "SELECT {READING_COLS} FROM meter_readings
         WHERE meter_id = $1 AND reading_date < $2
         ORDER BY reading_date DESC, recorded_at DESC
         LIMIT 1"
    ))
    .bind(meter_id)
    .bind(date)
    .fetch_optional(pool)
    .await
    .map_err(map_db_error)
}

/// Latest reading at or before `date` (the "current reading" query).
pub async fn reading_at_or_before(
    pool: &PgPool,
    meter_id: Uuid,
    date: NaiveDate,
) -> AppResult<Option<MeterReading>> {
    sqlx::query_as::<_, MeterReading>(&format!(
        "SELECT {READING_COLS} FROM meter_readings
         WHERE meter_id = $1 AND reading_date <= $2
         ORDER BY reading_date DESC, recorded_at DESC
         LIMIT 1"
    ))
    .bind(meter_id)
    .bind(date)
    .fetch_optional(pool)
    .await
    .map_err(map_db_error)
}

/// Latest reading on the chain, under the caller's meter lock.
pub async fn latest_reading(
    conn: &mut PgConnection,
    meter_id: Uuid,
) -> AppResult<Option<MeterReading>> {
    sqlx::query_as::<_, MeterReading>(&format!(
        "SELECT {READING_COLS} FROM meter_readings
         WHERE meter_id = $1
         ORDER BY reading_date DESC, recorded_at DESC
         LIMIT 1"
    ))
    .bind(meter_id)
    .fetch_optional(conn)
    .await
    .map_err(map_db_error)
}

pub async fn insert_reading(
    conn: &mut PgConnection,
    meter_id: Uuid,
    reading_date: NaiveDate,
    value: Decimal,
) -> AppResult<MeterReading> {
    sqlx::query_as::<_, MeterReading>(&format!(
        "INSERT INTO meter_readings (meter_id, reading_date, value)
         VALUES ($1, $2, $3)
         RETURNING {READING_COLS}"
    ))
    .bind(meter_id)
    .bind(reading_date)
    .bind(value)
    .fetch_one(conn)
    .await
    .map_err(map_db_error)
}

pub async fn list_readings(
    pool: &PgPool,
    meter_id: Uuid,
    limit: i64,
) -> AppResult<Vec<MeterReading>> {
    sqlx::query_as::<_, MeterReading>(&format!(
        "SELECT {READING_COLS} FROM meter_readings
         WHERE meter_id = $1
         ORDER BY reading_date DESC, recorded_at DESC
         LIMIT $2"
    ))
    .bind(meter_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)
}

// ---------------------------------------------------------------------------
// Invoices
// ---------------------------------------------------------------------------

/// One non-cancelled invoice per (contract, period): the pre-check
/// half of the idempotency guarantee. The partial unique index is the
/// race-proof half.
pub async fn active_invoice_exists(
    pool: &PgPool,
    contract_id: Uuid,
    period_start: NaiveDate,
    period_end: NaiveDate,
) -> AppResult<bool> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        "SELECT id FROM invoices
         WHERE contract_id = $1 AND period_start = $2 AND period_end = $3
           AND status <> 'cancelled'
         LIMIT 1",
    )
    .bind(contract_id)
    .bind(period_start)
    .bind(period_end)
    .fetch_optional(pool)
    .await
    .map_err(map_db_error)?;
    Ok(row.is_some())
}

pub struct NewInvoice {
    pub contract_id: Uuid,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub currency: String,
    pub total_amount: Decimal,
    pub due_date: NaiveDate,
}

pub async fn insert_invoice(conn: &mut PgConnection, new: &NewInvoice) -> AppResult<Invoice> {
    sqlx::query_as::<_, Invoice>(&format!(
        "INSERT INTO invoices
             (contract_id, period_start, period_end, status, currency,
              total_amount, paid_amount, due_date)
         VALUES ($1, $2, $3, 'draft', $4, $5, 0, $6)
         RETURNING {INVOICE_COLS}"
    ))
    .bind(new.contract_id)
    .bind(new.period_start)
    .bind(new.period_end)
    .bind(&new.currency)
    .bind(new.total_amount)
    .bind(new.due_date)
    .fetch_one(conn)
    .await
    .map_err(map_db_error)
}

pub async fn insert_invoice_line(
    conn: &mut PgConnection,
    invoice_id: Uuid,
    position: i32,
    line: &DraftLine,
) -> AppResult<InvoiceLine> {
    sqlx::query_as::<_, InvoiceLine>(&format!(
        "INSERT INTO invoice_lines
             (invoice_id, position, description, kind, quantity, unit_price, tax_rate, amount)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING {LINE_COLS}"
    ))
    .bind(invoice_id)
    .bind(position)
    .bind(&line.description)
    .bind(line.kind)
    .bind(line.quantity)
    .bind(line.unit_price)
    .bind(line.tax_rate)
    .bind(line.amount)
    .fetch_one(conn)
    .await
    .map_err(map_db_error)
}

pub async fn get_invoice(pool: &PgPool, invoice_id: Uuid) -> AppResult<Invoice> {
    sqlx::query_as::<_, Invoice>(&format!(
        "SELECT {INVOICE_COLS} FROM invoices WHERE id = $1"
    ))
    .bind(invoice_id)
    .fetch_optional(pool)
    .await
    .map_err(map_db_error)?
    .ok_or_else(|| AppError::NotFound(format!("Invoice {invoice_id} not found.")))
}

/// Lock the invoice row: every paid_amount/status mutation is a single
/// atomic read-modify-write under this lock.
pub async fn lock_invoice(conn: &mut PgConnection, invoice_id: Uuid) -> AppResult<Invoice> {
    sqlx::query_as::<_, Invoice>(&format!(
        "SELECT {INVOICE_COLS} FROM invoices WHERE id = $1 FOR UPDATE"
    ))
    .bind(invoice_id)
    .fetch_optional(conn)
    .await
    .map_err(map_db_error)?
    .ok_or_else(|| AppError::NotFound(format!("Invoice {invoice_id} not found.")))
}

pub async fn update_invoice_status(
    conn: &mut PgConnection,
    invoice_id: Uuid,
    status: InvoiceStatus,
) -> AppResult<Invoice> {
    sqlx::query_as::<_, Invoice>(&format!(
        "UPDATE invoices SET status = $2 WHERE id = $1 RETURNING {INVOICE_COLS}"
    ))
    .bind(invoice_id)
    .bind(status)
    .fetch_one(conn)
    .await
    .map_err(map_db_error)
}

pub async fn update_invoice_allocation(
    conn: &mut PgConnection,
    invoice_id: Uuid,
    paid_amount: Decimal,
    status: InvoiceStatus,
) -> AppResult<Invoice> {
    sqlx::query_as::<_, Invoice>(&format!(
        "UPDATE invoices SET paid_amount = $2, status = $3 WHERE id = $1 RETURNING {INVOICE_COLS}"
    ))
    .bind(invoice_id)
    .bind(paid_amount)
    .bind(status)
    .fetch_one(conn)
    .await
    .map_err(map_db_error)
}

pub async fn get_invoice_lines(pool: &PgPool, invoice_id: Uuid) -> AppResult<Vec<InvoiceLine>> {
    sqlx::query_as::<_, InvoiceLine>(&format!(
        "SELECT {LINE_COLS} FROM invoice_lines WHERE invoice_id = $1 ORDER BY position"
    ))
    .bind(invoice_id)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)
}

/// Line count under the caller's invoice lock, for the posting guard.
pub async fn count_invoice_lines(conn: &mut PgConnection, invoice_id: Uuid) -> AppResult<i64> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM invoice_lines WHERE invoice_id = $1")
            .bind(invoice_id)
            .fetch_one(conn)
            .await
            .map_err(map_db_error)?;
    Ok(count)
}

pub async fn list_invoices(
    pool: &PgPool,
    contract_id: Option<Uuid>,
    status: Option<InvoiceStatus>,
    limit: i64,
) -> AppResult<Vec<Invoice>> {
    sqlx::query_as::<_, Invoice>(&format!(
        "SELECT {INVOICE_COLS} FROM invoices
         WHERE ($1::uuid IS NULL OR contract_id = $1)
           AND ($2::invoice_status IS NULL OR status = $2)
         ORDER BY created_at DESC
         LIMIT $3"
    ))
    .bind(contract_id)
    .bind(status)
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)
}

/// Posted invoices past their due date as of `today`.
pub async fn overdue_invoices(pool: &PgPool, today: NaiveDate) -> AppResult<Vec<Invoice>> {
    sqlx::query_as::<_, Invoice>(&format!(
        "SELECT {INVOICE_COLS} FROM invoices
         WHERE status = 'posted' AND due_date < $1
         ORDER BY due_date"
    ))
    .bind(today)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)
}

// ---------------------------------------------------------------------------
// Payments
// ---------------------------------------------------------------------------

pub async fn get_payment(conn: &mut PgConnection, payment_id: Uuid) -> AppResult<Payment> {
    sqlx::query_as::<_, Payment>(&format!(
        "SELECT {PAYMENT_COLS} FROM payments WHERE id = $1"
    ))
    .bind(payment_id)
    .fetch_optional(conn)
    .await
    .map_err(map_db_error)?
    .ok_or_else(|| AppError::NotFound(format!("Payment {payment_id} not found.")))
}

pub async fn find_payment_by_key(
    conn: &mut PgConnection,
    invoice_id: Uuid,
    idempotency_key: &str,
) -> AppResult<Option<Payment>> {
    sqlx::query_as::<_, Payment>(&format!(
        "SELECT {PAYMENT_COLS} FROM payments
         WHERE invoice_id = $1 AND idempotency_key = $2"
    ))
    .bind(invoice_id)
    .bind(idempotency_key)
    .fetch_optional(conn)
    .await
    .map_err(map_db_error)
}

pub async fn insert_payment(
    conn: &mut PgConnection,
    invoice_id: Uuid,
    amount: Decimal,
    payment_date: NaiveDate,
    notes: Option<&str>,
    idempotency_key: Option<&str>,
) -> AppResult<Payment> {
    sqlx::query_as::<_, Payment>(&format!(
        "INSERT INTO payments (invoice_id, amount, payment_date, notes, idempotency_key)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING {PAYMENT_COLS}"
    ))
    .bind(invoice_id)
    .bind(amount)
    .bind(payment_date)
    .bind(notes)
    .bind(idempotency_key)
    .fetch_one(conn)
    .await
    .map_err(map_db_error)
}

/// Returns the number of rows removed. Zero means a concurrent delete
/// won after our initial read; the caller must not touch the invoice.
pub async fn delete_payment_row(conn: &mut PgConnection, payment_id: Uuid) -> AppResult<u64> {
    let result = sqlx::query("DELETE FROM payments WHERE id = $1")
        .bind(payment_id)
        .execute(conn)
        .await
        .map_err(map_db_error)?;
    Ok(result.rows_affected())
}

pub async fn list_payments(pool: &PgPool, invoice_id: Uuid) -> AppResult<Vec<Payment>> {
    sqlx::query_as::<_, Payment>(&format!(
        "SELECT {PAYMENT_COLS} FROM payments
         WHERE invoice_id = $1
         ORDER BY payment_date, created_at"
    ))
    .bind(invoice_id)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)
}
