//! Metered-consumption resolution.
//!
//! Pure computation over a reading window fetched by the repository:
//! the consumption delta for a billing period, and the invoice line it
//! prices out to. Regressions are surfaced as `ConsumptionAnomaly` and
//! never clamped into a fabricated charge.

use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::domain::{BillingPeriod, DraftLine, LineKind, Meter, MeterReading, ServiceDef};
use crate::error::{AppError, AppResult};
use crate::repository::billing as repo;

/// The two readings framing a billing period. `previous` falls back to
/// the meter's registered baseline on the first-ever cycle.
#[derive(Debug, Clone)]
pub struct ReadingWindow {
    pub previous: Decimal,
    pub current: Option<MeterReading>,
}

pub async fn fetch_window(
    pool: &PgPool,
    meter: &Meter,
    period: BillingPeriod,
) -> AppResult<ReadingWindow> {
    let previous = repo::reading_before(pool, meter.id, period.start())
        .await?
        .map(|reading| reading.value)
        .unwrap_or(meter.baseline_value);
    let current = repo::reading_at_or_before(pool, meter.id, period.end()).await?;
    Ok(ReadingWindow { previous, current })
}

/// Billable consumption for the period, or the exact error keeping the
/// billing run from fabricating a charge.
pub fn resolve_consumption(meter: &Meter, window: &ReadingWindow) -> AppResult<Decimal> {
    let current = window.current.as_ref().ok_or_else(|| {
        AppError::MissingReading(format!("meter {} has no reading in or before the period", meter.id))
    })?;

    let consumption = current.value - window.previous;
    if consumption < Decimal::ZERO {
        return Err(AppError::ConsumptionAnomaly {
            meter_id: meter.id,
            previous: window.previous,
            current: current.value,
        });
    }
    Ok(consumption)
}

/// Price the period's consumption into a meter line. Zero consumption
/// still yields a line (a read meter with no usage is a valid charge of
/// zero); a missing `price_per_unit` on a metered service is a catalog
/// defect the caller must hear about.
pub fn meter_line(
    meter: &Meter,
    service: &ServiceDef,
    window: &ReadingWindow,
) -> AppResult<DraftLine> {
    let consumption = resolve_consumption(meter, window)?;
    let price_per_unit = service.price_per_unit.ok_or_else(|| {
        AppError::ServiceMisconfigured(format!(
            "metered service {} has no price_per_unit configured",
            service.id
        ))
    })?;

    // Lines are stored tax-inclusive; the flat per-line rate is folded
    // into the unit price before rounding the amount.
    let gross_unit_price = price_per_unit * (Decimal::ONE + service.tax_rate);

    Ok(DraftLine::new(
        service.name.clone(),
        LineKind::Meter,
        consumption,
        gross_unit_price,
        service.tax_rate,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use crate::domain::{MeterScope, ServiceKind};

    fn meter(baseline: Decimal) -> Meter {
        Meter {
            id: Uuid::new_v4(),
            scope: MeterScope::Unit,
            unit_id: Some(Uuid::new_v4()),
            service_id: Uuid::new_v4(),
            baseline_value: baseline,
            active: true,
        }
    }

    fn reading(meter_id: Uuid, value: Decimal) -> MeterReading {
        MeterReading {
            id: Uuid::new_v4(),
            meter_id,
            reading_date: NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
            value,
            recorded_at: Utc::now(),
        }
    }

    fn water_service(price_per_unit: Decimal, tax_rate: Decimal) -> ServiceDef {
        ServiceDef {
            id: Uuid::new_v4(),
            name: "Water".to_string(),
            kind: ServiceKind::Metered,
            default_price: None,
            price_per_unit: Some(price_per_unit),
            tax_rate,
            active: true,
        }
    }

    #[test]
    fn consumption_is_delta_between_readings() {
        let m = meter(dec!(0));
        let window = ReadingWindow {
            previous: dec!(100),
            current: Some(reading(m.id, dec!(150))),
        };
        assert_eq!(resolve_consumption(&m, &window).unwrap(), dec!(50));
    }

    #[test]
    fn first_cycle_measures_against_baseline() {
        let m = meter(dec!(40));
        let window = ReadingWindow {
            previous: m.baseline_value,
            current: Some(reading(m.id, dec!(100))),
        };
        assert_eq!(resolve_consumption(&m, &window).unwrap(), dec!(60));
    }

    #[test]
    fn missing_current_reading_is_an_error() {
        let m = meter(dec!(0));
        let window = ReadingWindow {
            previous: dec!(100),
            current: None,
        };
        assert!(matches!(
            resolve_consumption(&m, &window),
            Err(AppError::MissingReading(_))
        ));
    }

    #[test]
    fn regression_raises_anomaly_not_a_clamped_charge() {
        let m = meter(dec!(0));
        let window = ReadingWindow {
            previous: dec!(100),
            current: Some(reading(m.id, dec!(80))),
        };
        match resolve_consumption(&m, &window) {
            Err(AppError::ConsumptionAnomaly {
                previous, current, ..
            }) => {
                assert_eq!(previous, dec!(100));
                assert_eq!(current, dec!(80));
            }
            other => panic!("expected anomaly, got {other:?}"),
        }
    }

    #[test]
    fn meter_line_prices_consumption_per_unit() {
        // previous 100, current 150, price 2, no tax: amount 100.
        let m = meter(dec!(0));
        let window = ReadingWindow {
            previous: dec!(100),
            current: Some(reading(m.id, dec!(150))),
        };
        let line = meter_line(&m, &water_service(dec!(2), dec!(0)), &window).unwrap();
        assert_eq!(line.kind, LineKind::Meter);
        assert_eq!(line.quantity, dec!(50));
        assert_eq!(line.amount, dec!(100));
    }

    #[test]
    fn meter_line_folds_tax_into_unit_price() {
        let m = meter(dec!(0));
        let window = ReadingWindow {
            previous: dec!(0),
            current: Some(reading(m.id, dec!(10))),
        };
        let line = meter_line(&m, &water_service(dec!(2), dec!(0.10)), &window).unwrap();
        assert_eq!(line.unit_price, dec!(2.20));
        assert_eq!(line.amount, dec!(22.00));
    }

    #[test]
    fn unpriced_metered_service_is_a_catalog_error() {
        let m = meter(dec!(0));
        let mut service = water_service(dec!(1), dec!(0));
        service.price_per_unit = None;
        let window = ReadingWindow {
            previous: dec!(10),
            current: Some(reading(m.id, dec!(20))),
        };
        assert!(matches!(
            meter_line(&m, &service, &window),
            Err(AppError::ServiceMisconfigured(_))
        ));
    }

    #[test]
    fn zero_consumption_is_a_zero_line_not_an_error() {
        let m = meter(dec!(0));
        let window = ReadingWindow {
            previous: dec!(100),
            current: Some(reading(m.id, dec!(100))),
        };
        let line = meter_line(&m, &water_service(dec!(2), dec!(0)), &window).unwrap();
        assert_eq!(line.amount, dec!(0));
    }
}
