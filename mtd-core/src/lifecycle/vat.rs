//! Preparing and recording VAT returns for a stored period.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{not_found, require_owner};
use crate::calculations::vat::{VatBoxes, VatReadiness, assess_readiness, calculate_vat_boxes};
use crate::db::MtdRepository;
use crate::error::MtdError;
use crate::models::{BusinessProfile, NewVatSubmission, TaxPeriod, VatSubmission};

/// Boxes for one period plus the owner's readiness to file them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VatReturn {
    pub period_key: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub boxes: VatBoxes,
    pub readiness: VatReadiness,
}

pub struct VatFiling<'a> {
    repo: &'a dyn MtdRepository,
    owner_id: String,
}

impl<'a> VatFiling<'a> {
    pub fn new(
        repo: &'a dyn MtdRepository,
        owner: Option<&str>,
    ) -> Result<Self, MtdError> {
        Ok(Self {
            repo,
            owner_id: require_owner(owner)?,
        })
    }

    /// Derives the nine boxes from the transactions inside the period.
    pub async fn prepare(
        &self,
        period_id: i64,
    ) -> Result<VatReturn, MtdError> {
        let period = self.period(period_id).await?;
        self.prepare_for(&period).await
    }

    /// Prepares the return and stores a snapshot of its boxes.
    ///
    /// Readiness is advisory: an incomplete profile is logged, not rejected.
    pub async fn record(
        &self,
        period_id: i64,
    ) -> Result<VatSubmission, MtdError> {
        let period = self.period(period_id).await?;
        let vat_return = self.prepare_for(&period).await?;

        if !vat_return.readiness.is_ready() {
            warn!(
                period_id,
                score = vat_return.readiness.score,
                outstanding = ?vat_return.readiness.outstanding,
                "Recording VAT return with incomplete setup"
            );
        }

        let saved = self
            .repo
            .create_vat_submission(NewVatSubmission {
                owner_id: self.owner_id.clone(),
                period_key: vat_return.period_key,
                period_start: vat_return.period_start,
                period_end: vat_return.period_end,
                boxes: vat_return.boxes,
                submitted_at: Utc::now(),
            })
            .await?;

        info!(
            period_id,
            submission_id = saved.id,
            net_vat = %saved.boxes.box5,
            "Recorded VAT return"
        );
        Ok(saved)
    }

    /// Previously recorded returns, newest first.
    pub async fn history(&self) -> Result<Vec<VatSubmission>, MtdError> {
        Ok(self.repo.list_vat_submissions(&self.owner_id).await?)
    }

    async fn period(
        &self,
        period_id: i64,
    ) -> Result<TaxPeriod, MtdError> {
        self.repo
            .get_tax_period(&self.owner_id, period_id)
            .await
            .map_err(not_found(format!("period {period_id}")))
    }

    async fn prepare_for(
        &self,
        period: &TaxPeriod,
    ) -> Result<VatReturn, MtdError> {
        let income = self
            .repo
            .income_between(&self.owner_id, period.start_date, period.end_date)
            .await?;
        let expenses = self
            .repo
            .expenses_between(&self.owner_id, period.start_date, period.end_date)
            .await?;
        let profile = self
            .repo
            .get_business_profile(&self.owner_id)
            .await?
            .unwrap_or_else(|| BusinessProfile::empty(&self.owner_id));

        Ok(VatReturn {
            period_key: period.period_key.clone(),
            period_start: period.start_date,
            period_end: period.end_date,
            boxes: calculate_vat_boxes(&income, &expenses),
            readiness: assess_readiness(&profile, income.len()),
        })
    }
}
