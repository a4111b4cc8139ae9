//! Common utility functions for tax calculations.
//!
//! This module provides shared functionality used across the income tax,
//! NIC and VAT calculators, including penny rounding and band slicing.

use rust_decimal::{Decimal, RoundingStrategy};

/// Rounds a decimal value to exactly two decimal places using half-up rounding.
///
/// This follows standard financial rounding conventions where values at exactly
/// 0.005 are rounded up to 0.01 (away from zero).
///
/// # Examples
///
/// ```
/// use rust_decimal_macros::dec;
/// use mtd_core::calculations::common::round_half_up;
///
/// assert_eq!(round_half_up(dec!(123.454)), dec!(123.45));
/// assert_eq!(round_half_up(dec!(123.455)), dec!(123.46));
/// assert_eq!(round_half_up(dec!(-123.455)), dec!(-123.46)); // Away from zero
/// ```
pub fn round_half_up(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Clamps negative values to zero.
///
/// # Examples
///
/// ```
/// use rust_decimal_macros::dec;
/// use mtd_core::calculations::common::non_negative;
///
/// assert_eq!(non_negative(dec!(-1.50)), dec!(0));
/// assert_eq!(non_negative(dec!(42.00)), dec!(42.00));
/// ```
pub fn non_negative(value: Decimal) -> Decimal {
    value.max(Decimal::ZERO)
}

/// Portion of `value` that falls inside the band `(lower, upper]`.
///
/// `upper = None` means the band is unbounded. A band whose upper edge is at
/// or below its lower edge contains nothing.
///
/// # Examples
///
/// ```
/// use rust_decimal_macros::dec;
/// use mtd_core::calculations::common::amount_in_band;
///
/// assert_eq!(amount_in_band(dec!(60000), dec!(50270), Some(dec!(125140))), dec!(9730));
/// assert_eq!(amount_in_band(dec!(40000), dec!(50270), Some(dec!(125140))), dec!(0));
/// assert_eq!(amount_in_band(dec!(200000), dec!(125140), None), dec!(74860));
/// ```
pub fn amount_in_band(
    value: Decimal,
    lower: Decimal,
    upper: Option<Decimal>,
) -> Decimal {
    let capped = match upper {
        Some(upper) => value.min(upper),
        None => value,
    };
    non_negative(capped - lower)
}
