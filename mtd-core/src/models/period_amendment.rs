use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmendmentType {
    Correction,
    LateSubmission,
    DataUpdate,
}

impl AmendmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Correction => "correction",
            Self::LateSubmission => "late_submission",
            Self::DataUpdate => "data_update",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "correction" => Some(Self::Correction),
            "late_submission" => Some(Self::LateSubmission),
            "data_update" => Some(Self::DataUpdate),
            _ => None,
        }
    }
}

/// Audit record of one reopen/resubmit cycle on a period.
///
/// `previous_*` are captured when the period is reopened. `new_*` start out
/// equal to them and are overwritten once, when the corrected period is
/// submitted. A `None` in `submitted_at` marks the amendment as open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodAmendment {
    pub id: i64,
    pub tax_period_id: i64,
    pub amendment_type: AmendmentType,
    pub reason: String,
    pub previous_income: Decimal,
    pub previous_expenses: Decimal,
    pub new_income: Decimal,
    pub new_expenses: Decimal,
    pub income_difference: Decimal,
    pub expenses_difference: Decimal,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl PeriodAmendment {
    pub fn is_open(&self) -> bool {
        self.submitted_at.is_none()
    }

    /// Change in net profit caused by this amendment.
    pub fn profit_difference(&self) -> Decimal {
        self.income_difference - self.expenses_difference
    }
}

/// For creating new amendments (no id)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPeriodAmendment {
    pub tax_period_id: i64,
    pub amendment_type: AmendmentType,
    pub reason: String,
    pub previous_income: Decimal,
    pub previous_expenses: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Figures written onto an open amendment when it is finalised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmendmentFinalization {
    pub amendment_id: i64,
    pub new_income: Decimal,
    pub new_expenses: Decimal,
    pub income_difference: Decimal,
    pub expenses_difference: Decimal,
    pub submitted_at: DateTime<Utc>,
}
