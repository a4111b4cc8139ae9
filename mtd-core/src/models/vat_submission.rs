use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::calculations::VatBoxes;

/// Historical snapshot of a VAT return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VatSubmission {
    pub id: i64,
    pub owner_id: String,
    pub period_key: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub boxes: VatBoxes,
    pub submitted_at: DateTime<Utc>,
}

/// For creating new VAT submissions (no id)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVatSubmission {
    pub owner_id: String,
    pub period_key: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub boxes: VatBoxes,
    pub submitted_at: DateTime<Utc>,
}
