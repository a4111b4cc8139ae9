//! End of Period Statement aggregation.
//!
//! Rolls the four quarterly updates of a tax year together with the year's
//! accounting adjustments into a single statement:
//!
//! ```text
//! net_profit      = Σ total_income − Σ total_expenses
//! taxable_profit  = net_profit + (additions − deductions)
//! tax_due         = income tax(taxable_profit) + Class 4 NIC(taxable_profit)
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::calculations::income_tax::{IncomeTaxResult, calculate_income_tax};
use crate::calculations::nic::{Nic4Result, calculate_nic4};
use crate::models::{AdjustmentTotals, TaxAdjustment, TaxPeriod, TaxYearRates};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearEndStatement {
    pub tax_year: i32,
    pub total_income: Decimal,
    pub total_expenses: Decimal,
    pub net_profit: Decimal,
    pub adjustments: AdjustmentTotals,
    pub taxable_profit: Decimal,
    pub income_tax: IncomeTaxResult,
    pub nic: Nic4Result,
    pub tax_due: Decimal,
}

/// Builds the year-end statement from stored quarterly totals.
///
/// # Example
///
/// ```
/// use rust_decimal_macros::dec;
/// use mtd_core::TaxYearRates;
/// use mtd_core::calculations::year_end::build_year_end_statement;
///
/// let statement = build_year_end_statement(2024, &[], &[], &TaxYearRates::uk_2024_25());
///
/// assert_eq!(statement.net_profit, dec!(0));
/// assert_eq!(statement.tax_due, dec!(0));
/// ```
pub fn build_year_end_statement(
    tax_year: i32,
    periods: &[TaxPeriod],
    adjustments: &[TaxAdjustment],
    rates: &TaxYearRates,
) -> YearEndStatement {
    let total_income: Decimal = periods.iter().map(|p| p.total_income).sum();
    let total_expenses: Decimal = periods.iter().map(|p| p.total_expenses).sum();
    let net_profit = total_income - total_expenses;

    let adjustments = AdjustmentTotals::from_adjustments(adjustments);
    let taxable_profit = net_profit + adjustments.net_adjustment;

    let income_tax = calculate_income_tax(taxable_profit, rates);
    let nic = calculate_nic4(taxable_profit, rates);
    let tax_due = income_tax.tax + nic.nic;

    YearEndStatement {
        tax_year,
        total_income,
        total_expenses,
        net_profit,
        adjustments,
        taxable_profit,
        income_tax,
        nic,
        tax_due,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::models::PeriodStatus;

    fn period(
        quarter: u8,
        income: Decimal,
        expenses: Decimal,
    ) -> TaxPeriod {
        let date = NaiveDate::from_ymd_opt(2024, 4, 6).unwrap();
        TaxPeriod {
            id: i64::from(quarter),
            owner_id: "owner".to_string(),
            tax_year: 2024,
            quarter_number: quarter,
            period_key: format!("2024Q{quarter}"),
            start_date: date,
            end_date: date,
            deadline_date: date,
            status: PeriodStatus::Submitted,
            submitted_at: None,
            total_income: income,
            total_expenses: expenses,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn adjustment(
        amount: Decimal,
        is_addition: bool,
    ) -> TaxAdjustment {
        TaxAdjustment {
            id: 0,
            owner_id: "owner".to_string(),
            tax_year: 2024,
            description: "adjustment".to_string(),
            amount,
            is_addition,
        }
    }

    #[test]
    fn year_with_a_deduction() {
        let periods = [
            period(1, dec!(5000), dec!(1250)),
            period(2, dec!(5000), dec!(1250)),
            period(3, dec!(5000), dec!(1250)),
            period(4, dec!(5000), dec!(1250)),
        ];
        let adjustments = [adjustment(dec!(1000), false)];

        let statement =
            build_year_end_statement(2024, &periods, &adjustments, &TaxYearRates::uk_2024_25());

        assert_eq!(statement.total_income, dec!(20000));
        assert_eq!(statement.total_expenses, dec!(5000));
        assert_eq!(statement.net_profit, dec!(15000));
        assert_eq!(statement.adjustments.net_adjustment, dec!(-1000));
        assert_eq!(statement.taxable_profit, dec!(14000));
        assert_eq!(statement.income_tax.tax, dec!(286));
        assert_eq!(statement.nic.nic, dec!(85.8));
        assert_eq!(statement.tax_due, dec!(371.80));
    }

    #[test]
    fn additions_increase_taxable_profit() {
        let periods = [period(1, dec!(30000), dec!(0))];
        let adjustments = [
            adjustment(dec!(2500), true),
            adjustment(dec!(500), false),
        ];

        let statement =
            build_year_end_statement(2024, &periods, &adjustments, &TaxYearRates::uk_2024_25());

        assert_eq!(statement.adjustments.additions, dec!(2500));
        assert_eq!(statement.adjustments.deductions, dec!(500));
        assert_eq!(statement.taxable_profit, dec!(32000));
    }

    #[test]
    fn loss_making_year_owes_nothing() {
        let periods = [period(1, dec!(2000), dec!(9000))];

        let statement = build_year_end_statement(2024, &periods, &[], &TaxYearRates::uk_2024_25());

        assert_eq!(statement.net_profit, dec!(-7000));
        assert_eq!(statement.tax_due, dec!(0));
    }
}
