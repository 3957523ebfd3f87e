use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::AppError;

/// Round a money amount to 2 decimal places, half away from zero.
/// Every stored amount goes through this exact helper so results are
/// reproducible.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// An inclusive billing period. Construction is the single place the
/// `periodEnd < periodStart` guard lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingPeriod {
    start: NaiveDate,
    end: NaiveDate,
}

impl BillingPeriod {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, AppError> {
        if end < start {
            return Err(AppError::InvalidPeriod(format!(
                "period end {end} is before period start {start}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Inclusive day count, so a single-day period counts as 1.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Intersection with `[start, end ?? +inf]`, or None when disjoint.
    pub fn overlap(&self, start: NaiveDate, end: Option<NaiveDate>) -> Option<BillingPeriod> {
        let lo = self.start.max(start);
        let hi = match end {
            Some(e) => self.end.min(e),
            None => self.end,
        };
        (lo <= hi).then_some(BillingPeriod { start: lo, end: hi })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "rent_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RentType {
    Monthly,
    Daily,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Contract {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub unit_id: Uuid,
    pub customer_id: Uuid,
    pub rent_type: RentType,
    pub base_rent_amount: Decimal,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "service_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Metered,
    FixedFee,
}

/// A billable service from the catalog. Metered services carry
/// `price_per_unit`, fixed-fee services carry `default_price`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ServiceDef {
    pub id: Uuid,
    pub name: String,
    pub kind: ServiceKind,
    pub default_price: Option<Decimal>,
    pub price_per_unit: Option<Decimal>,
    pub tax_rate: Decimal,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "meter_scope", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MeterScope {
    Unit,
    Building,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Meter {
    pub id: Uuid,
    pub scope: MeterScope,
    pub unit_id: Option<Uuid>,
    pub service_id: Uuid,
    /// First-ever billing cycle has no prior reading; consumption is
    /// measured against this registered baseline instead.
    pub baseline_value: Decimal,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MeterReading {
    pub id: Uuid,
    pub meter_id: Uuid,
    pub reading_date: NaiveDate,
    pub value: Decimal,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "invoice_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Posted,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Posted => "posted",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub status: InvoiceStatus,
    pub currency: String,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub due_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl Invoice {
    pub fn remaining_amount(&self) -> Decimal {
        self.total_amount - self.paid_amount
    }

    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        !matches!(self.status, InvoiceStatus::Paid | InvoiceStatus::Cancelled)
            && today > self.due_date
    }

    pub fn overdue_days(&self, today: NaiveDate) -> i64 {
        if self.is_overdue(today) {
            (today - self.due_date).num_days()
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "line_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    Rent,
    Service,
    Meter,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceLine {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub position: i32,
    pub description: String,
    pub kind: LineKind,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub tax_rate: Decimal,
    pub amount: Decimal,
}

/// A computed line not yet attached to an invoice. Amounts are already
/// tax-inclusive: `amount = round(quantity * unit_price, 2)` where the
/// unit price carries the flat per-line tax rate.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftLine {
    pub description: String,
    pub kind: LineKind,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub tax_rate: Decimal,
    pub amount: Decimal,
}

impl DraftLine {
    pub fn new(
        description: impl Into<String>,
        kind: LineKind,
        quantity: Decimal,
        unit_price: Decimal,
        tax_rate: Decimal,
    ) -> Self {
        Self {
            description: description.into(),
            kind,
            quantity,
            unit_price,
            tax_rate,
            amount: round_money(quantity * unit_price),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub payment_date: NaiveDate,
    pub notes: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Per-organization billing settings resolved by the repository, with
/// `AppConfig` defaults as fallback. Passed explicitly into the
/// composer: never read from ambient state.
#[derive(Debug, Clone)]
pub struct BillingSettings {
    pub currency: String,
    pub due_grace_days: i64,
    pub merge_services_with_rent: bool,
    pub rent_tax_rate: Decimal,
}

impl BillingSettings {
    pub fn due_date_for(&self, period_end: NaiveDate) -> NaiveDate {
        period_end + Duration::days(self.due_grace_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn invoice(status: InvoiceStatus, due: NaiveDate) -> Invoice {
        Invoice {
            id: Uuid::new_v4(),
            contract_id: Uuid::new_v4(),
            period_start: date(2025, 1, 1),
            period_end: date(2025, 1, 31),
            status,
            currency: "EUR".to_string(),
            total_amount: dec!(1000),
            paid_amount: dec!(250),
            due_date: due,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn period_rejects_inverted_bounds() {
        assert!(BillingPeriod::new(date(2025, 2, 1), date(2025, 1, 1)).is_err());
    }

    #[test]
    fn period_days_are_inclusive() {
        let p = BillingPeriod::new(date(2025, 1, 1), date(2025, 1, 30)).unwrap();
        assert_eq!(p.days(), 30);
        let single = BillingPeriod::new(date(2025, 1, 5), date(2025, 1, 5)).unwrap();
        assert_eq!(single.days(), 1);
    }

    #[test]
    fn overlap_with_open_ended_contract() {
        let p = BillingPeriod::new(date(2025, 1, 1), date(2025, 1, 31)).unwrap();
        let o = p.overlap(date(2025, 1, 16), None).unwrap();
        assert_eq!(o.start(), date(2025, 1, 16));
        assert_eq!(o.end(), date(2025, 1, 31));
        assert_eq!(o.days(), 16);
    }

    #[test]
    fn overlap_disjoint_is_none() {
        let p = BillingPeriod::new(date(2025, 1, 1), date(2025, 1, 31)).unwrap();
        assert!(p.overlap(date(2025, 2, 1), None).is_none());
        assert!(p
            .overlap(date(2024, 1, 1), Some(date(2024, 12, 31)))
            .is_none());
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(round_money(dec!(10.005)), dec!(10.01));
        assert_eq!(round_money(dec!(10.004)), dec!(10.00));
        assert_eq!(round_money(dec!(-10.005)), dec!(-10.01));
    }

    // isOverdue holds iff status not in {Paid, Cancelled} and now > dueDate,
    // across every status/due-date combination.
    #[test]
    fn overdue_is_derived_from_status_and_due_date() {
        let statuses = [
            InvoiceStatus::Draft,
            InvoiceStatus::Posted,
            InvoiceStatus::Paid,
            InvoiceStatus::Cancelled,
        ];
        let today = date(2025, 3, 15);
        for status in statuses {
            for offset in [-40i64, -1, 0, 1, 40] {
                let due = today + Duration::days(offset);
                let inv = invoice(status, due);
                let expected = !matches!(status, InvoiceStatus::Paid | InvoiceStatus::Cancelled)
                    && today > due;
                assert_eq!(inv.is_overdue(today), expected, "{status:?} offset {offset}");
                if expected {
                    assert_eq!(inv.overdue_days(today), -offset);
                } else {
                    assert_eq!(inv.overdue_days(today), 0);
                }
            }
        }
    }

    #[test]
    fn remaining_amount_is_total_minus_paid() {
        let inv = invoice(InvoiceStatus::Posted, date(2025, 2, 14));
        assert_eq!(inv.remaining_amount(), dec!(750));
    }

    #[test]
    fn draft_line_amount_is_rounded_product() {
        let line = DraftLine::new("Water", LineKind::Meter, dec!(3), dec!(0.333), dec!(0));
        assert_eq!(line.amount, dec!(1.00));
    }
}
