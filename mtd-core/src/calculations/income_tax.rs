//! Income tax on self-employed profit.
//!
//! The personal allowance is withdrawn by £1 for every £2 of profit above the
//! taper threshold and never falls below zero. The rate bands are then applied
//! to the profit that lies above the allowance:
//!
//! | Band                | Applies to profit between          | 2024/25 rate |
//! |---------------------|------------------------------------|--------------|
//! | Personal Allowance  | 0 and the (tapered) allowance      | 0%           |
//! | Basic rate          | the allowance and £50,270          | 20%          |
//! | Higher rate         | £50,270 and £125,140               | 40%          |
//! | Additional rate     | above £125,140                     | 45%          |
//!
//! Negative profit is treated as zero. Each band's tax is rounded to the
//! penny, and the total is the sum of the rounded bands.
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use mtd_core::TaxYearRates;
//! use mtd_core::calculations::income_tax::calculate_income_tax;
//!
//! let result = calculate_income_tax(dec!(50270), &TaxYearRates::uk_2024_25());
//!
//! assert_eq!(result.tax, dec!(7540.00));
//! assert_eq!(result.breakdown[0].band_label, "Personal Allowance");
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::TaxYearRates;
use crate::calculations::common::{amount_in_band, non_negative, round_half_up};
use crate::calculations::nic::{Nic4Result, calculate_nic4};

/// Errors raised when a rates table cannot be used for calculation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RatesError {
    /// A percentage rate must be between 0 and 1.
    #[error("{name} must be between 0 and 1, got {value}")]
    InvalidRate { name: &'static str, value: Decimal },

    /// A threshold must be non-negative.
    #[error("{name} must be non-negative, got {value}")]
    NegativeThreshold { name: &'static str, value: Decimal },

    /// Band limits must increase from one band to the next.
    #[error("{lower} must not exceed {upper}")]
    BandOrder {
        lower: &'static str,
        upper: &'static str,
    },
}

/// One line of a tax or NIC breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandBreakdown {
    pub band_label: String,
    pub rate: Decimal,
    pub amount_in_band: Decimal,
    pub tax_for_band: Decimal,
}

impl BandBreakdown {
    pub(crate) fn new(
        band_label: String,
        rate: Decimal,
        amount_in_band: Decimal,
    ) -> Self {
        Self {
            band_label,
            rate,
            amount_in_band,
            tax_for_band: round_half_up(amount_in_band * rate),
        }
    }
}

/// Formats a fractional rate as a percentage label, e.g. `0.40` → `40%`.
pub(crate) fn percent_label(rate: Decimal) -> String {
    format!("{}%", (rate * Decimal::ONE_HUNDRED).normalize())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomeTaxResult {
    /// Personal allowance remaining after the taper.
    pub personal_allowance: Decimal,
    pub taxable_income: Decimal,
    pub tax: Decimal,
    pub breakdown: Vec<BandBreakdown>,
}

/// Personal allowance after the high-income taper.
///
/// # Example
///
/// ```
/// use rust_decimal_macros::dec;
/// use mtd_core::TaxYearRates;
/// use mtd_core::calculations::income_tax::tapered_allowance;
///
/// let rates = TaxYearRates::uk_2024_25();
///
/// assert_eq!(tapered_allowance(dec!(100000), &rates), dec!(12570));
/// assert_eq!(tapered_allowance(dec!(110000), &rates), dec!(7570));
/// assert_eq!(tapered_allowance(dec!(125140), &rates), dec!(0));
/// ```
pub fn tapered_allowance(
    profit: Decimal,
    rates: &TaxYearRates,
) -> Decimal {
    let excess = non_negative(profit - rates.taper_threshold);
    non_negative(rates.personal_allowance - excess / Decimal::TWO)
}

/// Income tax due on a year's taxable profit.
pub fn calculate_income_tax(
    profit: Decimal,
    rates: &TaxYearRates,
) -> IncomeTaxResult {
    if profit < Decimal::ZERO {
        warn!(profit = %profit, "Negative profit; income tax treated as zero");
    }
    let profit = non_negative(profit);
    let allowance = tapered_allowance(profit, rates);

    let mut breakdown = Vec::with_capacity(4);
    if allowance > Decimal::ZERO {
        breakdown.push(BandBreakdown::new(
            "Personal Allowance".to_string(),
            Decimal::ZERO,
            profit.min(allowance),
        ));
    }

    let basic_floor = allowance;
    let higher_floor = rates.basic_rate_limit.max(allowance);
    let additional_floor = rates.higher_rate_limit.max(allowance);

    let bands = [
        (
            "Basic rate",
            rates.basic_rate,
            amount_in_band(profit, basic_floor, Some(rates.basic_rate_limit)),
        ),
        (
            "Higher rate",
            rates.higher_rate,
            amount_in_band(profit, higher_floor, Some(rates.higher_rate_limit)),
        ),
        (
            "Additional rate",
            rates.additional_rate,
            amount_in_band(profit, additional_floor, None),
        ),
    ];

    for (name, rate, amount) in bands {
        if amount > Decimal::ZERO {
            breakdown.push(BandBreakdown::new(
                format!("{name} ({})", percent_label(rate)),
                rate,
                amount,
            ));
        }
    }

    let tax = breakdown.iter().map(|b| b.tax_for_band).sum();

    IncomeTaxResult {
        personal_allowance: allowance,
        taxable_income: non_negative(profit - allowance),
        tax,
        breakdown,
    }
}

/// Income tax and Class 4 NIC for one rates table.
///
/// # Example
///
/// ```
/// use rust_decimal_macros::dec;
/// use mtd_core::TaxYearRates;
/// use mtd_core::calculations::TaxCalculator;
///
/// let calculator = TaxCalculator::new(TaxYearRates::uk_2024_25()).unwrap();
///
/// assert_eq!(calculator.income_tax(dec!(14000)).tax, dec!(286.00));
/// assert_eq!(calculator.nic4(dec!(14000)).nic, dec!(85.80));
/// assert_eq!(calculator.total_liability(dec!(14000)), dec!(371.80));
/// ```
#[derive(Debug, Clone)]
pub struct TaxCalculator {
    rates: TaxYearRates,
}

impl TaxCalculator {
    /// Creates a calculator after checking the rates table is usable.
    ///
    /// # Errors
    ///
    /// Returns [`RatesError`] if a rate is outside `[0, 1]`, a threshold is
    /// negative, or band limits are out of order.
    pub fn new(rates: TaxYearRates) -> Result<Self, RatesError> {
        validate_rates(&rates)?;
        Ok(Self { rates })
    }

    pub fn rates(&self) -> &TaxYearRates {
        &self.rates
    }

    pub fn income_tax(
        &self,
        profit: Decimal,
    ) -> IncomeTaxResult {
        calculate_income_tax(profit, &self.rates)
    }

    pub fn nic4(
        &self,
        profit: Decimal,
    ) -> Nic4Result {
        calculate_nic4(profit, &self.rates)
    }

    /// Income tax plus Class 4 NIC.
    pub fn total_liability(
        &self,
        profit: Decimal,
    ) -> Decimal {
        self.income_tax(profit).tax + self.nic4(profit).nic
    }

    /// Total liability as a fraction of profit, to four decimal places.
    /// Zero when there is no profit.
    pub fn effective_rate(
        &self,
        profit: Decimal,
    ) -> Decimal {
        if profit <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (self.total_liability(profit) / profit).round_dp(4)
    }
}

fn validate_rates(rates: &TaxYearRates) -> Result<(), RatesError> {
    let fractions = [
        ("basic_rate", rates.basic_rate),
        ("higher_rate", rates.higher_rate),
        ("additional_rate", rates.additional_rate),
        ("nic_main_rate", rates.nic_main_rate),
        ("nic_additional_rate", rates.nic_additional_rate),
    ];
    for (name, value) in fractions {
        if value < Decimal::ZERO || value > Decimal::ONE {
            return Err(RatesError::InvalidRate { name, value });
        }
    }

    let thresholds = [
        ("personal_allowance", rates.personal_allowance),
        ("taper_threshold", rates.taper_threshold),
        ("basic_rate_limit", rates.basic_rate_limit),
        ("higher_rate_limit", rates.higher_rate_limit),
        ("nic_lower_profits_limit", rates.nic_lower_profits_limit),
        ("nic_upper_profits_limit", rates.nic_upper_profits_limit),
    ];
    for (name, value) in thresholds {
        if value < Decimal::ZERO {
            return Err(RatesError::NegativeThreshold { name, value });
        }
    }

    if rates.basic_rate_limit > rates.higher_rate_limit {
        return Err(RatesError::BandOrder {
            lower: "basic_rate_limit",
            upper: "higher_rate_limit",
        });
    }
    if rates.nic_lower_profits_limit > rates.nic_upper_profits_limit {
        return Err(RatesError::BandOrder {
            lower: "nic_lower_profits_limit",
            upper: "nic_upper_profits_limit",
        });
    }
    Ok(())
}
