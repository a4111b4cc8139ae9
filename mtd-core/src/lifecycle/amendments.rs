//! Audit trail of reopen and resubmit cycles.
//!
//! An amendment is opened when a filed period is reopened, snapshotting the
//! figures that were filed. It is finalised when the corrected period is
//! submitted, recording the new figures and the differences. At most one
//! amendment per period is open at any time, because a period can only be
//! reopened from a closed state and only resubmitted from draft.

use chrono::{DateTime, Utc};

use super::{not_found, require_owner};
use crate::db::MtdRepository;
use crate::error::MtdError;
use crate::models::{
    AmendmentFinalization, AmendmentType, NewPeriodAmendment, PeriodAmendment, TaxPeriod,
};

pub struct AmendmentLedger<'a> {
    repo: &'a dyn MtdRepository,
    owner_id: String,
}

impl<'a> AmendmentLedger<'a> {
    pub fn new(
        repo: &'a dyn MtdRepository,
        owner: Option<&str>,
    ) -> Result<Self, MtdError> {
        Ok(Self {
            repo,
            owner_id: require_owner(owner)?,
        })
    }

    /// The amendment row written when `period` is reopened.
    pub fn open(
        period: &TaxPeriod,
        amendment_type: AmendmentType,
        reason: &str,
        at: DateTime<Utc>,
    ) -> NewPeriodAmendment {
        NewPeriodAmendment {
            tax_period_id: period.id,
            amendment_type,
            reason: reason.trim().to_string(),
            previous_income: period.total_income,
            previous_expenses: period.total_expenses,
            created_at: at,
        }
    }

    /// Final figures for `amendment`, taken from the period as it stands.
    pub fn finalize(
        amendment: &PeriodAmendment,
        period: &TaxPeriod,
        at: DateTime<Utc>,
    ) -> AmendmentFinalization {
        AmendmentFinalization {
            amendment_id: amendment.id,
            new_income: period.total_income,
            new_expenses: period.total_expenses,
            income_difference: period.total_income - amendment.previous_income,
            expenses_difference: period.total_expenses - amendment.previous_expenses,
            submitted_at: at,
        }
    }

    /// Every amendment for one of the owner's periods, newest first.
    pub async fn history(
        &self,
        period_id: i64,
    ) -> Result<Vec<PeriodAmendment>, MtdError> {
        self.repo
            .get_tax_period(&self.owner_id, period_id)
            .await
            .map_err(not_found(format!("period {period_id}")))?;
        Ok(self.repo.list_amendments(period_id).await?)
    }

    /// The most recent amendment, if it has not been finalised yet.
    pub async fn open_amendment(
        &self,
        period_id: i64,
    ) -> Result<Option<PeriodAmendment>, MtdError> {
        self.repo
            .get_tax_period(&self.owner_id, period_id)
            .await
            .map_err(not_found(format!("period {period_id}")))?;
        Ok(self
            .repo
            .latest_amendment(period_id)
            .await?
            .filter(PeriodAmendment::is_open))
    }
}
