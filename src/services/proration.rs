//! Rent proration.
//!
//! Turns a contract and a billing period into the rent line of an
//! invoice. Day counts are inclusive calendar days on both ends; there
//! is no 30-day-month convention.

use rust_decimal::Decimal;

use crate::domain::{round_money, BillingPeriod, Contract, DraftLine, LineKind, RentType};

/// Compute the rent line for `contract` over `period`, or `None` when
/// the contract does not overlap the period at all (a billing run may
/// legitimately hit a terminated contract; that is not an error).
pub fn rent_line(
    contract: &Contract,
    period: BillingPeriod,
    tax_rate: Decimal,
) -> Option<DraftLine> {
    let overlap = period.overlap(contract.start_date, contract.end_date)?;
    let overlap_days = overlap.days();

    // Lines are stored tax-inclusive; fold the rate into the rent
    // before prorating, same as the service lines do.
    let gross_base = contract.base_rent_amount * (Decimal::ONE + tax_rate);

    let (description, quantity, unit_price) = match contract.rent_type {
        RentType::Monthly => {
            let amount = if overlap == period {
                gross_base
            } else {
                // Prorate by calendar days of the requested period.
                round_money(
                    gross_base * Decimal::from(overlap_days) / Decimal::from(period.days()),
                )
            };
            let description = if overlap == period {
                format!("Rent {} to {}", period.start(), period.end())
            } else {
                format!(
                    "Rent {} to {} ({overlap_days}/{} days)",
                    overlap.start(),
                    overlap.end(),
                    period.days()
                )
            };
            (description, Decimal::ONE, amount)
        }
        RentType::Daily => (
            format!(
                "Rent {} to {} ({overlap_days} days)",
                overlap.start(),
                overlap.end()
            ),
            Decimal::from(overlap_days),
            gross_base,
        ),
    };

    Some(DraftLine::new(
        description,
        LineKind::Rent,
        quantity,
        unit_price,
        tax_rate,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn contract(
        rent_type: RentType,
        base: Decimal,
        start: NaiveDate,
        end: Option<NaiveDate>,
    ) -> Contract {
        Contract {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            unit_id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            rent_type,
            base_rent_amount: base,
            start_date: start,
            end_date: end,
            active: true,
        }
    }

    #[test]
    fn monthly_full_period_is_exact_base_rent() {
        let c = contract(RentType::Monthly, dec!(987.65), date(2024, 1, 1), None);
        let period = BillingPeriod::new(date(2025, 4, 1), date(2025, 4, 30)).unwrap();
        let line = rent_line(&c, period, dec!(0)).unwrap();
        assert_eq!(line.amount, dec!(987.65));
        assert_eq!(line.quantity, dec!(1));
    }

    #[test]
    fn monthly_rent_folds_tax_into_amount() {
        let c = contract(RentType::Monthly, dec!(1000), date(2024, 1, 1), None);
        let period = BillingPeriod::new(date(2025, 4, 1), date(2025, 4, 30)).unwrap();
        let line = rent_line(&c, period, dec!(0.10)).unwrap();
        assert_eq!(line.amount, dec!(1100.00));
        assert_eq!(line.tax_rate, dec!(0.10));
    }

    #[test]
    fn prorated_rent_folds_tax_before_rounding() {
        // 15 of 30 days at 1000 gross 1100: half is 550.00.
        let c = contract(RentType::Monthly, dec!(1000), date(2025, 4, 16), None);
        let period = BillingPeriod::new(date(2025, 4, 1), date(2025, 4, 30)).unwrap();
        let line = rent_line(&c, period, dec!(0.10)).unwrap();
        assert_eq!(line.amount, dec!(550.00));
    }

    #[test]
    fn daily_rent_folds_tax_into_unit_price() {
        let c = contract(RentType::Daily, dec!(50), date(2025, 1, 1), None);
        let period = BillingPeriod::new(date(2025, 6, 1), date(2025, 6, 10)).unwrap();
        let line = rent_line(&c, period, dec!(0.21)).unwrap();
        assert_eq!(line.quantity, dec!(10));
        assert_eq!(line.amount, dec!(605.00));
    }

    #[test]
    fn monthly_prorates_by_calendar_days() {
        // 30-day period, contract starts on day 16: 15 overlap days.
        let c = contract(RentType::Monthly, dec!(1000), date(2025, 4, 16), None);
        let period = BillingPeriod::new(date(2025, 4, 1), date(2025, 4, 30)).unwrap();
        let line = rent_line(&c, period, dec!(0)).unwrap();
        assert_eq!(line.amount, dec!(500.00));
    }

    #[test]
    fn monthly_prorates_on_contract_end() {
        let c = contract(
            RentType::Monthly,
            dec!(900),
            date(2024, 1, 1),
            Some(date(2025, 1, 10)),
        );
        let period = BillingPeriod::new(date(2025, 1, 1), date(2025, 1, 31)).unwrap();
        let line = rent_line(&c, period, dec!(0)).unwrap();
        // 10 of 31 days
        assert_eq!(line.amount, dec!(290.32));
    }

    #[test]
    fn daily_rent_multiplies_overlap_days() {
        let c = contract(RentType::Daily, dec!(50), date(2025, 1, 1), None);
        let period = BillingPeriod::new(date(2025, 6, 1), date(2025, 6, 10)).unwrap();
        let line = rent_line(&c, period, dec!(0)).unwrap();
        assert_eq!(line.quantity, dec!(10));
        assert_eq!(line.amount, dec!(500));
    }

    #[test]
    fn daily_rent_prorates_only_by_truncated_overlap() {
        let c = contract(RentType::Daily, dec!(50), date(2025, 6, 8), None);
        let period = BillingPeriod::new(date(2025, 6, 1), date(2025, 6, 10)).unwrap();
        let line = rent_line(&c, period, dec!(0)).unwrap();
        assert_eq!(line.quantity, dec!(3));
        assert_eq!(line.amount, dec!(150));
    }

    #[test]
    fn no_overlap_yields_no_line() {
        let c = contract(
            RentType::Monthly,
            dec!(1000),
            date(2024, 1, 1),
            Some(date(2024, 12, 31)),
        );
        let period = BillingPeriod::new(date(2025, 1, 1), date(2025, 1, 31)).unwrap();
        assert!(rent_line(&c, period, dec!(0)).is_none());
    }
}
