use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::MtdError;

/// A sale or other business receipt. `amount` is VAT-inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomeTransaction {
    pub id: i64,
    pub owner_id: String,
    pub transaction_date: NaiveDate,
    pub amount: Decimal,
    /// Percentage, e.g. `20` for standard-rated supplies.
    pub vat_rate: Decimal,
    pub description: Option<String>,
}

/// A business purchase. `amount` is VAT-inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseTransaction {
    pub id: i64,
    pub owner_id: String,
    pub transaction_date: NaiveDate,
    pub amount: Decimal,
    pub vat_rate: Decimal,
    pub description: Option<String>,
    /// Portion of `amount` that cannot be claimed against profit.
    pub disallowable_amount: Option<Decimal>,
}

impl ExpenseTransaction {
    /// Amount that counts towards period expenses.
    pub fn allowable_amount(&self) -> Decimal {
        self.amount - self.disallowable_amount.unwrap_or(Decimal::ZERO)
    }
}

/// For creating new income records (no id)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIncomeTransaction {
    pub owner_id: String,
    pub transaction_date: NaiveDate,
    pub amount: Decimal,
    pub vat_rate: Decimal,
    pub description: Option<String>,
}

/// For creating new expense records (no id)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewExpenseTransaction {
    pub owner_id: String,
    pub transaction_date: NaiveDate,
    pub amount: Decimal,
    pub vat_rate: Decimal,
    pub description: Option<String>,
    pub disallowable_amount: Option<Decimal>,
}

fn validate_amount_and_rate(
    amount: Decimal,
    vat_rate: Decimal,
) -> Result<(), MtdError> {
    if amount <= Decimal::ZERO {
        return Err(MtdError::Validation(format!(
            "amount must be positive, got {amount}"
        )));
    }
    if vat_rate < Decimal::ZERO {
        return Err(MtdError::Validation(format!(
            "VAT rate must not be negative, got {vat_rate}"
        )));
    }
    Ok(())
}

impl NewIncomeTransaction {
    pub fn validate(&self) -> Result<(), MtdError> {
        validate_amount_and_rate(self.amount, self.vat_rate)
    }
}

impl NewExpenseTransaction {
    pub fn validate(&self) -> Result<(), MtdError> {
        validate_amount_and_rate(self.amount, self.vat_rate)?;
        if let Some(disallowable) = self.disallowable_amount {
            if disallowable < Decimal::ZERO || disallowable > self.amount {
                return Err(MtdError::Validation(format!(
                    "disallowable amount {disallowable} must lie between 0 and {}",
                    self.amount
                )));
            }
        }
        Ok(())
    }
}
