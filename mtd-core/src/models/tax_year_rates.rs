use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Income tax and Class 4 NIC parameters for one UK tax year.
///
/// `tax_year` is the calendar year in which the tax year starts, so `2024`
/// denotes 6 April 2024 to 5 April 2025. Band limits are expressed in terms
/// of total profit, not taxable income after the allowance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxYearRates {
    pub tax_year: i32,
    pub personal_allowance: Decimal,
    /// Profit above which the personal allowance is withdrawn at £1 per £2.
    pub taper_threshold: Decimal,
    pub basic_rate_limit: Decimal,
    pub higher_rate_limit: Decimal,
    pub basic_rate: Decimal,
    pub higher_rate: Decimal,
    pub additional_rate: Decimal,
    pub nic_lower_profits_limit: Decimal,
    pub nic_upper_profits_limit: Decimal,
    pub nic_main_rate: Decimal,
    pub nic_additional_rate: Decimal,
}

impl TaxYearRates {
    /// Published rates for the 2024/25 tax year.
    pub fn uk_2024_25() -> Self {
        Self {
            tax_year: 2024,
            personal_allowance: dec!(12570),
            taper_threshold: dec!(100000),
            basic_rate_limit: dec!(50270),
            higher_rate_limit: dec!(125140),
            basic_rate: dec!(0.20),
            higher_rate: dec!(0.40),
            additional_rate: dec!(0.45),
            nic_lower_profits_limit: dec!(12570),
            nic_upper_profits_limit: dec!(50270),
            nic_main_rate: dec!(0.06),
            nic_additional_rate: dec!(0.02),
        }
    }

    /// The same thresholds carried into another tax year.
    ///
    /// Allowances and Class 4 limits were frozen from 2024/25 through
    /// 2025/26, so this is how the 2025 seed row is produced.
    pub fn frozen_for(tax_year: i32) -> Self {
        Self {
            tax_year,
            ..Self::uk_2024_25()
        }
    }
}

impl Default for TaxYearRates {
    fn default() -> Self {
        Self::uk_2024_25()
    }
}
