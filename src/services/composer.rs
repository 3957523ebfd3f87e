//! Invoice composition.
//!
//! One invoice per (contract, period): a pre-check rejects the common
//! case, the partial unique index rejects the race. Every candidate
//! line is computed before any write, so a single consumption anomaly
//! aborts the whole invoice instead of committing a partially-correct
//! one.

use rust_decimal::Decimal;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::{AnomalyPolicy, AppConfig};
use crate::domain::{round_money, BillingPeriod, DraftLine, Invoice, LineKind};
use crate::error::{map_db_error, AppError, AppResult};
use crate::repository::billing as repo;
use crate::services::{consumption, events, proration};

pub async fn generate_invoice(
    pool: &PgPool,
    config: &AppConfig,
    contract_id: Uuid,
    period: BillingPeriod,
) -> AppResult<Invoice> {
    let contract = repo::get_contract(pool, contract_id).await?;
    let settings = repo::settings_for_org(pool, config, contract.organization_id).await?;

    if repo::active_invoice_exists(pool, contract_id, period.start(), period.end()).await? {
        return Err(AppError::DuplicateInvoice);
    }

    // Compute all candidate lines before touching storage.
    let rent = proration::rent_line(&contract, period, settings.rent_tax_rate);

    let fixed: Vec<DraftLine> = repo::fixed_services_for_unit(pool, contract.unit_id)
        .await?
        .into_iter()
        .map(|service| {
            let price = service.default_price.ok_or_else(|| {
                AppError::ServiceMisconfigured(format!(
                    "fixed-fee service {} has no default_price configured",
                    service.id
                ))
            })?;
            let gross = price * (Decimal::ONE + service.tax_rate);
            Ok(DraftLine::new(
                service.name,
                LineKind::Service,
                Decimal::ONE,
                gross,
                service.tax_rate,
            ))
        })
        .collect::<AppResult<_>>()?;

    let mut metered = Vec::new();
    for (meter, service) in repo::metered_services_for_unit(pool, contract.unit_id).await? {
        let window = consumption::fetch_window(pool, &meter, period).await?;
        match consumption::meter_line(&meter, &service, &window) {
            Ok(line) => metered.push(line),
            Err(err @ AppError::ConsumptionAnomaly { .. })
                if config.anomaly_policy == AnomalyPolicy::Skip =>
            {
                tracing::warn!(
                    meter_id = %meter.id,
                    service = %service.name,
                    error = %err,
                    "Skipping anomalous meter line"
                );
            }
            Err(err) => return Err(err),
        }
    }

    let lines = assemble_lines(rent, fixed, metered, settings.merge_services_with_rent)?;
    let total_amount = total_amount(&lines);

    let mut tx = pool.begin().await.map_err(map_db_error)?;
    let invoice = repo::insert_invoice(
        &mut tx,
        &repo::NewInvoice {
            contract_id,
            period_start: period.start(),
            period_end: period.end(),
            currency: settings.currency.clone(),
            total_amount,
            due_date: settings.due_date_for(period.end()),
        },
    )
    .await?;
    for (position, line) in lines.iter().enumerate() {
        repo::insert_invoice_line(&mut tx, invoice.id, position as i32, line).await?;
    }
    tx.commit().await.map_err(map_db_error)?;

    tracing::info!(
        invoice_id = %invoice.id,
        %contract_id,
        period_start = %period.start(),
        period_end = %period.end(),
        total = %total_amount,
        lines = lines.len(),
        "Invoice generated"
    );
    events::emit(
        pool,
        events::INVOICE_GENERATED,
        "invoice",
        invoice.id,
        json!({
            "contract_id": contract_id,
            "period_start": period.start(),
            "period_end": period.end(),
            "total_amount": total_amount,
            "currency": settings.currency,
        }),
    )
    .await;

    Ok(invoice)
}

/// Fixed order: rent, fixed-fee services, metered services. With the
/// merge flag set, a rent line present and one uniform tax rate across
/// all lines, rent and services collapse into a single combined line.
pub fn assemble_lines(
    rent: Option<DraftLine>,
    fixed: Vec<DraftLine>,
    metered: Vec<DraftLine>,
    merge_services_with_rent: bool,
) -> AppResult<Vec<DraftLine>> {
    let has_rent = rent.is_some();
    let mut lines: Vec<DraftLine> = Vec::new();
    lines.extend(rent);
    lines.extend(fixed);
    lines.extend(metered);

    if lines.is_empty() {
        return Err(AppError::EmptyInvoice);
    }

    // The merge only makes sense around an actual rent line; a
    // rent-less invoice keeps its service lines labeled as they are.
    if merge_services_with_rent && has_rent && lines.len() > 1 {
        let uniform_rate = lines.iter().all(|line| line.tax_rate == lines[0].tax_rate);
        if uniform_rate {
            let combined_amount: Decimal = lines.iter().map(|line| line.amount).sum();
            let tax_rate = lines[0].tax_rate;
            lines = vec![DraftLine::new(
                "Rent and services",
                LineKind::Rent,
                Decimal::ONE,
                combined_amount,
                tax_rate,
            )];
        }
    }

    Ok(lines)
}

pub fn total_amount(lines: &[DraftLine]) -> Decimal {
    round_money(lines.iter().map(|line| line.amount).sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(kind: LineKind, amount: Decimal, tax_rate: Decimal) -> DraftLine {
        DraftLine::new("x", kind, Decimal::ONE, amount, tax_rate)
    }

    #[test]
    fn lines_keep_fixed_order() {
        let lines = assemble_lines(
            Some(line(LineKind::Rent, dec!(1000), dec!(0))),
            vec![line(LineKind::Service, dec!(30), dec!(0))],
            vec![line(LineKind::Meter, dec!(55.50), dec!(0))],
            false,
        )
        .unwrap();
        let kinds: Vec<_> = lines.iter().map(|l| l.kind).collect();
        assert_eq!(kinds, vec![LineKind::Rent, LineKind::Service, LineKind::Meter]);
        assert_eq!(total_amount(&lines), dec!(1085.50));
    }

    #[test]
    fn empty_candidate_set_is_rejected() {
        assert!(matches!(
            assemble_lines(None, vec![], vec![], false),
            Err(AppError::EmptyInvoice)
        ));
    }

    #[test]
    fn merge_collapses_uniform_tax_lines() {
        let lines = assemble_lines(
            Some(line(LineKind::Rent, dec!(1000), dec!(0.10))),
            vec![line(LineKind::Service, dec!(30), dec!(0.10))],
            vec![],
            true,
        )
        .unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].kind, LineKind::Rent);
        assert_eq!(lines[0].amount, dec!(1030));
    }

    #[test]
    fn merge_is_skipped_on_mixed_tax_rates() {
        let lines = assemble_lines(
            Some(line(LineKind::Rent, dec!(1000), dec!(0))),
            vec![line(LineKind::Service, dec!(30), dec!(0.10))],
            vec![],
            true,
        )
        .unwrap();
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn merge_is_skipped_without_a_rent_line() {
        let lines = assemble_lines(
            None,
            vec![line(LineKind::Service, dec!(30), dec!(0))],
            vec![line(LineKind::Meter, dec!(55.50), dec!(0))],
            true,
        )
        .unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].kind, LineKind::Service);
        assert_eq!(lines[1].kind, LineKind::Meter);
    }

    #[test]
    fn rent_only_merge_stays_single_line() {
        let lines = assemble_lines(
            Some(line(LineKind::Rent, dec!(1000), dec!(0))),
            vec![],
            vec![],
            true,
        )
        .unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].description, "x");
    }
}
