use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EopsStatus {
    Draft,
    Submitted,
    Amended,
}

impl EopsStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::Amended => "amended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "submitted" => Some(Self::Submitted),
            "amended" => Some(Self::Amended),
            _ => None,
        }
    }

    pub fn is_filed(&self) -> bool {
        matches!(self, Self::Submitted | Self::Amended)
    }
}

/// One of the confirmations a sole trader makes before finalising the year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Declaration {
    AccountsFinalised,
    AllIncomeDeclared,
    AllExpensesClaimed,
    AdjustmentsReviewed,
}

impl fmt::Display for Declaration {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(match self {
            Self::AccountsFinalised => "accounts finalised",
            Self::AllIncomeDeclared => "all income declared",
            Self::AllExpensesClaimed => "all expenses claimed",
            Self::AdjustmentsReviewed => "adjustments reviewed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EopsDeclarations {
    pub accounts_finalised: bool,
    pub all_income_declared: bool,
    pub all_expenses_claimed: bool,
    pub adjustments_reviewed: bool,
}

impl EopsDeclarations {
    /// Every declaration confirmed.
    pub fn all() -> Self {
        Self {
            accounts_finalised: true,
            all_income_declared: true,
            all_expenses_claimed: true,
            adjustments_reviewed: true,
        }
    }

    /// Declarations that have not been confirmed, in form order.
    pub fn missing(&self) -> Vec<Declaration> {
        [
            (self.accounts_finalised, Declaration::AccountsFinalised),
            (self.all_income_declared, Declaration::AllIncomeDeclared),
            (self.all_expenses_claimed, Declaration::AllExpensesClaimed),
            (self.adjustments_reviewed, Declaration::AdjustmentsReviewed),
        ]
        .into_iter()
        .filter_map(|(confirmed, declaration)| (!confirmed).then_some(declaration))
        .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }
}

/// End of Period Statement for one owner and tax year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EopsSubmission {
    pub id: i64,
    pub owner_id: String,
    pub tax_year: i32,
    pub status: EopsStatus,
    pub total_income: Decimal,
    pub total_expenses: Decimal,
    pub total_adjustments: Decimal,
    pub net_profit: Decimal,
    pub taxable_profit: Decimal,
    pub tax_due: Decimal,
    pub declarations: EopsDeclarations,
    pub submitted_at: Option<DateTime<Utc>>,
    pub hmrc_submission_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Values written by an upsert keyed on (owner_id, tax_year).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertEopsSubmission {
    pub owner_id: String,
    pub tax_year: i32,
    pub status: EopsStatus,
    pub total_income: Decimal,
    pub total_expenses: Decimal,
    pub total_adjustments: Decimal,
    pub net_profit: Decimal,
    pub taxable_profit: Decimal,
    pub tax_due: Decimal,
    pub declarations: EopsDeclarations,
    pub submitted_at: Option<DateTime<Utc>>,
    pub hmrc_submission_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn missing_lists_unset_flags_in_order() {
        let declarations = EopsDeclarations {
            accounts_finalised: true,
            all_income_declared: false,
            all_expenses_claimed: true,
            adjustments_reviewed: false,
        };

        assert_eq!(
            declarations.missing(),
            vec![
                Declaration::AllIncomeDeclared,
                Declaration::AdjustmentsReviewed
            ]
        );
        assert!(!declarations.is_complete());
    }

    #[test]
    fn all_is_complete() {
        assert!(EopsDeclarations::all().is_complete());
        assert_eq!(EopsDeclarations::default().missing().len(), 4);
    }

    #[test]
    fn only_submitted_and_amended_count_as_filed() {
        assert!(!EopsStatus::Draft.is_filed());
        assert!(EopsStatus::Submitted.is_filed());
        assert!(EopsStatus::Amended.is_filed());
    }
}
