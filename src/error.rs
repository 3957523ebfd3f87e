use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Error taxonomy of the billing core. Every financial-computation
/// failure is surfaced verbatim as its own variant: money values are
/// never silently defaulted or clamped.
#[derive(Debug, Error)]
pub enum AppError {
    // Validation: rejected before any write.
    #[error("Invalid billing period: {0}")]
    InvalidPeriod(String),
    #[error("Invalid payment amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid meter reading value: {0}")]
    InvalidValue(String),

    // Conflict: no partial state change; caller must resolve and retry.
    #[error("An invoice already exists for this contract and period")]
    DuplicateInvoice,
    #[error("Payment exceeds the remaining invoice amount: {0}")]
    Overpayment(String),
    #[error("Invoice has recorded payments and cannot be cancelled")]
    CannotCancelPaidInvoice,
    #[error("Meter reading is out of order: {0}")]
    OutOfOrder(String),

    // State: existing state untouched.
    #[error("Invoice is already posted")]
    AlreadyPosted,
    #[error("Invoice is cancelled")]
    InvoiceCancelled,
    #[error("Invoice has no billable lines")]
    EmptyInvoice,

    // Anomaly: a data-quality problem upstream (meter swap), not
    // caller misuse. Distinct from ordinary validation.
    #[error("Negative consumption on meter {meter_id}: {previous} -> {current}")]
    ConsumptionAnomaly {
        meter_id: uuid::Uuid,
        previous: rust_decimal::Decimal,
        current: rust_decimal::Decimal,
    },
    #[error("No meter reading available for the billing period: {0}")]
    MissingReading(String),
    #[error("Service catalog is misconfigured: {0}")]
    ServiceMisconfigured(String),

    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    UnprocessableEntity(String),
    #[error("{0}")]
    Dependency(String),
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidPeriod(_) => "invalid_period",
            Self::InvalidAmount(_) => "invalid_amount",
            Self::InvalidValue(_) => "invalid_value",
            Self::DuplicateInvoice => "duplicate_invoice",
            Self::Overpayment(_) => "overpayment",
            Self::CannotCancelPaidInvoice => "cannot_cancel_paid_invoice",
            Self::OutOfOrder(_) => "out_of_order",
            Self::AlreadyPosted => "already_posted",
            Self::InvoiceCancelled => "invoice_cancelled",
            Self::EmptyInvoice => "empty_invoice",
            Self::ConsumptionAnomaly { .. } => "consumption_anomaly",
            Self::MissingReading(_) => "missing_reading",
            Self::ServiceMisconfigured(_) => "service_misconfigured",
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::UnprocessableEntity(_) => "unprocessable_entity",
            Self::Dependency(_) => "dependency_unavailable",
            Self::Internal(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidPeriod(_) | Self::InvalidAmount(_) | Self::InvalidValue(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::DuplicateInvoice
            | Self::Overpayment(_)
            | Self::CannotCancelPaidInvoice
            | Self::OutOfOrder(_)
            | Self::AlreadyPosted
            | Self::InvoiceCancelled
            | Self::EmptyInvoice
            | Self::ConsumptionAnomaly { .. }
            | Self::MissingReading(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::UnprocessableEntity(_) | Self::ServiceMisconfigured(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::Dependency(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        }
        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

/// Map a database error onto the taxonomy. Unique violations on the
/// invoice-period index mean a concurrent billing run won the race.
pub fn map_db_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::RowNotFound => AppError::NotFound("Record not found.".to_string()),
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            let constraint = db.constraint().unwrap_or_default();
            if constraint == "invoices_contract_period_active_key" {
                AppError::DuplicateInvoice
            } else {
                AppError::BadRequest(format!("Unique constraint violated: {constraint}"))
            }
        }
        _ => {
            tracing::error!(error = %err, "database error");
            AppError::Internal("Database error.".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AppError;
    use axum::http::StatusCode;

    #[test]
    fn conflict_family_maps_to_409() {
        for err in [
            AppError::DuplicateInvoice,
            AppError::AlreadyPosted,
            AppError::InvoiceCancelled,
            AppError::CannotCancelPaidInvoice,
        ] {
            assert_eq!(err.status(), StatusCode::CONFLICT);
        }
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(AppError::DuplicateInvoice.code(), "duplicate_invoice");
        assert_eq!(
            AppError::MissingReading("m".into()).code(),
            "missing_reading"
        );
        assert_eq!(
            AppError::ServiceMisconfigured("s".into()).code(),
            "service_misconfigured"
        );
    }

    #[test]
    fn catalog_misconfiguration_is_unprocessable_not_unavailable() {
        assert_eq!(
            AppError::ServiceMisconfigured("no price".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::Dependency("db down".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
