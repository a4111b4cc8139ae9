use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a quarterly period.
///
/// `Draft` is the only state in which figures may change. `Submitted` and
/// `Corrected` are both closed states that can be reopened for amendment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodStatus {
    Draft,
    Submitted,
    Corrected,
}

/// An operation checked against the period transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodAction {
    Submit,
    Reopen,
    SubmitAmendment,
    /// Recomputing stored totals; allowed in draft only and leaves the status alone.
    Refresh,
}

impl PeriodStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::Corrected => "corrected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "submitted" => Some(Self::Submitted),
            "corrected" => Some(Self::Corrected),
            _ => None,
        }
    }

    /// Whether the period has been filed and must be reopened before editing.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Submitted | Self::Corrected)
    }

    /// Transition table for the period lifecycle.
    ///
    /// | from      | action          | to        |
    /// |-----------|-----------------|-----------|
    /// | draft     | submit          | submitted |
    /// | submitted | reopen          | draft     |
    /// | corrected | reopen          | draft     |
    /// | draft     | submit_amendment| corrected |
    /// | draft     | refresh         | draft     |
    ///
    /// Every other pair is rejected with `None`.
    pub fn apply(
        self,
        action: PeriodAction,
    ) -> Option<PeriodStatus> {
        match (self, action) {
            (Self::Draft, PeriodAction::Submit) => Some(Self::Submitted),
            (Self::Submitted | Self::Corrected, PeriodAction::Reopen) => Some(Self::Draft),
            (Self::Draft, PeriodAction::SubmitAmendment) => Some(Self::Corrected),
            (Self::Draft, PeriodAction::Refresh) => Some(Self::Draft),
            _ => None,
        }
    }
}

impl fmt::Display for PeriodStatus {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PeriodAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Reopen => "reopen",
            Self::SubmitAmendment => "submit amendment for",
            Self::Refresh => "refresh totals for",
        }
    }
}

impl fmt::Display for PeriodAction {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reporting quarter for an owner and tax year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxPeriod {
    pub id: i64,
    pub owner_id: String,
    pub tax_year: i32,
    pub quarter_number: u8,
    pub period_key: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub deadline_date: NaiveDate,
    pub status: PeriodStatus,
    pub submitted_at: Option<DateTime<Utc>>,

    // Derived from transactions; refreshed on demand
    pub total_income: Decimal,
    pub total_expenses: Decimal,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaxPeriod {
    pub fn contains(
        &self,
        date: NaiveDate,
    ) -> bool {
        date >= self.start_date && date <= self.end_date
    }

    pub fn net_profit(&self) -> Decimal {
        self.total_income - self.total_expenses
    }

    /// A draft period whose filing deadline has passed.
    pub fn is_overdue(
        &self,
        today: NaiveDate,
    ) -> bool {
        self.status == PeriodStatus::Draft && today > self.deadline_date
    }
}

/// For creating new periods (no id or timestamps)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTaxPeriod {
    pub owner_id: String,
    pub tax_year: i32,
    pub quarter_number: u8,
    pub period_key: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub deadline_date: NaiveDate,
}
