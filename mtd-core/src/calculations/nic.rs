//! Class 4 National Insurance on self-employed profit.
//!
//! Nothing is due on profit up to the lower profits limit. The main rate
//! applies between the lower and upper profits limits, and the additional
//! rate to everything above the upper limit.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::TaxYearRates;
use crate::calculations::common::{amount_in_band, non_negative};
use crate::calculations::income_tax::{BandBreakdown, percent_label};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nic4Result {
    pub nic: Decimal,
    pub breakdown: Vec<BandBreakdown>,
}

impl Nic4Result {
    fn zero() -> Self {
        Self {
            nic: Decimal::ZERO,
            breakdown: Vec::new(),
        }
    }
}

/// Class 4 NIC due on a year's taxable profit.
///
/// # Example
///
/// ```
/// use rust_decimal_macros::dec;
/// use mtd_core::TaxYearRates;
/// use mtd_core::calculations::nic::calculate_nic4;
///
/// let rates = TaxYearRates::uk_2024_25();
///
/// assert_eq!(calculate_nic4(dec!(12000), &rates).nic, dec!(0));
/// assert_eq!(calculate_nic4(dec!(20000), &rates).nic, dec!(445.80));
/// ```
pub fn calculate_nic4(
    profit: Decimal,
    rates: &TaxYearRates,
) -> Nic4Result {
    if profit < Decimal::ZERO {
        warn!(profit = %profit, "Negative profit; Class 4 NIC treated as zero");
    }
    let profit = non_negative(profit);

    if profit <= rates.nic_lower_profits_limit {
        return Nic4Result::zero();
    }

    let bands = [
        (
            "Main rate",
            rates.nic_main_rate,
            amount_in_band(
                profit,
                rates.nic_lower_profits_limit,
                Some(rates.nic_upper_profits_limit),
            ),
        ),
        (
            "Additional rate",
            rates.nic_additional_rate,
            amount_in_band(profit, rates.nic_upper_profits_limit, None),
        ),
    ];

    let breakdown: Vec<BandBreakdown> = bands
        .into_iter()
        .filter(|(_, _, amount)| *amount > Decimal::ZERO)
        .map(|(name, rate, amount)| {
            BandBreakdown::new(format!("{name} ({})", percent_label(rate)), rate, amount)
        })
        .collect();

    Nic4Result {
        nic: breakdown.iter().map(|b| b.tax_for_band).sum(),
        breakdown,
    }
}
