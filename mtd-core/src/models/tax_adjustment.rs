use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::MtdError;

/// A year-end accounting adjustment to net profit.
///
/// Additions increase taxable profit (e.g. private use), deductions reduce
/// it (e.g. capital allowances).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxAdjustment {
    pub id: i64,
    pub owner_id: String,
    pub tax_year: i32,
    pub description: String,
    pub amount: Decimal,
    pub is_addition: bool,
}

/// For creating new adjustments (no id)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTaxAdjustment {
    pub owner_id: String,
    pub tax_year: i32,
    pub description: String,
    pub amount: Decimal,
    pub is_addition: bool,
}

impl NewTaxAdjustment {
    pub fn validate(&self) -> Result<(), MtdError> {
        if self.amount <= Decimal::ZERO {
            return Err(MtdError::Validation(format!(
                "adjustment amount must be positive, got {}",
                self.amount
            )));
        }
        Ok(())
    }
}

/// Additions, deductions and their net effect across a set of adjustments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AdjustmentTotals {
    pub additions: Decimal,
    pub deductions: Decimal,
    pub net_adjustment: Decimal,
}

impl AdjustmentTotals {
    pub fn from_adjustments(adjustments: &[TaxAdjustment]) -> Self {
        let (additions, deductions) =
            adjustments
                .iter()
                .fold((Decimal::ZERO, Decimal::ZERO), |(add, ded), adj| {
                    if adj.is_addition {
                        (add + adj.amount, ded)
                    } else {
                        (add, ded + adj.amount)
                    }
                });

        Self {
            additions,
            deductions,
            net_adjustment: additions - deductions,
        }
    }
}
