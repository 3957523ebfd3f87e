use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::domain::InvoiceStatus;
use crate::error::AppError;

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

pub fn clamp_limit_in_range(limit: Option<i64>, min: i64, max: i64) -> i64 {
    limit.unwrap_or(max).clamp(min, max)
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct GenerateInvoiceInput {
    pub contract_id: Uuid,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct RecordPaymentInput {
    pub amount: Decimal,
    pub payment_date: NaiveDate,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
    #[validate(length(min = 1, max = 128))]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct RecordReadingInput {
    pub reading_date: NaiveDate,
    pub value: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoicesQuery {
    pub contract_id: Option<Uuid>,
    pub status: Option<InvoiceStatus>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadingsQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceIdPath {
    pub invoice_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIdPath {
    pub payment_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeterIdPath {
    pub meter_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::clamp_limit_in_range;

    #[test]
    fn clamps_limits() {
        assert_eq!(clamp_limit_in_range(None, 1, 500), 500);
        assert_eq!(clamp_limit_in_range(Some(0), 1, 500), 1);
        assert_eq!(clamp_limit_in_range(Some(10_000), 1, 500), 500);
        assert_eq!(clamp_limit_in_range(Some(25), 1, 500), 25);
    }
}
