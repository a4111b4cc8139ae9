//! Quarterly period lifecycle.
//!
//! ```text
//! draft ──submit──▶ submitted ──reopen──▶ draft ──submit amendment──▶ corrected
//!                                           ▲                             │
//!                                           └────────────reopen───────────┘
//! ```
//!
//! Every status write is a compare-and-swap against the status that was
//! read, so of two racing mutations on the same period at most one wins and
//! the loser gets [`MtdError::InvalidTransition`].

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};

use super::amendments::AmendmentLedger;
use super::{not_found, require_owner};
use crate::calculations::scheduler::{Quarter, QuarterScheme, period_key, quarter_dates};
use crate::db::{MtdRepository, RepositoryError, StatusChange};
use crate::error::MtdError;
use crate::models::{
    AmendmentType, NewTaxPeriod, PeriodAction, PeriodAmendment, PeriodStatus, TaxPeriod,
};

pub struct PeriodStateMachine<'a> {
    repo: &'a dyn MtdRepository,
    owner_id: String,
}

impl<'a> PeriodStateMachine<'a> {
    /// Binds the state machine to an authenticated owner.
    ///
    /// # Errors
    /// [`MtdError::NotAuthenticated`] when `owner` is missing or blank.
    pub fn new(
        repo: &'a dyn MtdRepository,
        owner: Option<&str>,
    ) -> Result<Self, MtdError> {
        Ok(Self {
            repo,
            owner_id: require_owner(owner)?,
        })
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Creates whichever of the four quarters do not exist yet and returns
    /// all four. Running it again is a no-op.
    pub async fn initialize_quarters(
        &self,
        tax_year: i32,
        scheme: QuarterScheme,
    ) -> Result<Vec<TaxPeriod>, MtdError> {
        let existing = self.repo.list_tax_periods(&self.owner_id, tax_year).await?;

        for quarter in Quarter::ALL {
            if existing.iter().any(|p| p.quarter_number == quarter.number()) {
                continue;
            }

            let dates = quarter_dates(tax_year, quarter, scheme)
                .map_err(|e| MtdError::Validation(e.to_string()))?;
            let new_period = NewTaxPeriod {
                owner_id: self.owner_id.clone(),
                tax_year,
                quarter_number: quarter.number(),
                period_key: period_key(tax_year, quarter),
                start_date: dates.start,
                end_date: dates.end,
                deadline_date: dates.deadline,
            };

            match self.repo.create_tax_period(new_period).await {
                Ok(created) => info!(
                    owner_id = %self.owner_id,
                    period_id = created.id,
                    period_key = %created.period_key,
                    "Created tax period"
                ),
                // Another caller created it between our read and write.
                Err(RepositoryError::Conflict(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }

        Ok(self.repo.list_tax_periods(&self.owner_id, tax_year).await?)
    }

    /// Recomputes a draft period's totals from the transactions dated inside it.
    ///
    /// Income is the sum of gross amounts. Expenses exclude any disallowable
    /// portion. Status is never changed.
    ///
    /// # Errors
    /// [`MtdError::InvalidTransition`] unless the period is a draft. Filed
    /// figures stay as filed until the period is reopened, so the amendment
    /// snapshot taken at reopen is what was actually submitted.
    pub async fn refresh_totals(
        &self,
        period_id: i64,
    ) -> Result<TaxPeriod, MtdError> {
        let period = self.period(period_id).await?;
        next_status(&period, PeriodAction::Refresh)?;

        let income = self
            .repo
            .income_between(&self.owner_id, period.start_date, period.end_date)
            .await?;
        let expenses = self
            .repo
            .expenses_between(&self.owner_id, period.start_date, period.end_date)
            .await?;

        let total_income: Decimal = income.iter().map(|t| t.amount).sum();
        let total_expenses: Decimal = expenses.iter().map(|t| t.allowable_amount()).sum();

        let updated = match self
            .repo
            .update_period_totals(&self.owner_id, period_id, total_income, total_expenses)
            .await
        {
            Ok(updated) => updated,
            Err(err) => return Err(self.lost_race(period_id, PeriodAction::Refresh, err).await),
        };

        info!(
            period_id,
            total_income = %updated.total_income,
            total_expenses = %updated.total_expenses,
            "Refreshed period totals"
        );
        Ok(updated)
    }

    /// Files a draft period.
    ///
    /// A draft that was reopened for amendment must go through
    /// [`Self::submit_amended_period`] instead.
    pub async fn submit(
        &self,
        period_id: i64,
    ) -> Result<TaxPeriod, MtdError> {
        let period = self.period(period_id).await?;
        let next = next_status(&period, PeriodAction::Submit)?;

        if let Some(open) = self
            .repo
            .latest_amendment(period_id)
            .await?
            .filter(PeriodAmendment::is_open)
        {
            warn!(
                period_id,
                amendment_id = open.id,
                "Period has an open amendment; use submit_amended_period"
            );
            return Err(MtdError::InvalidTransition {
                period_id,
                from: period.status,
                action: PeriodAction::Submit,
            });
        }

        let now = Utc::now();
        let change = self.status_change(&period, next, Some(now));
        if let Err(err) = self.repo.transition_period(&change).await {
            return Err(self.lost_race(period_id, PeriodAction::Submit, err).await);
        }

        info!(period_id, period_key = %period.period_key, "Submitted period");
        self.period(period_id).await
    }

    /// Reopens a filed period as a [`AmendmentType::Correction`].
    pub async fn reopen_for_amendment(
        &self,
        period_id: i64,
        reason: &str,
    ) -> Result<PeriodAmendment, MtdError> {
        self.reopen_with_type(period_id, reason, AmendmentType::Correction)
            .await
    }

    /// Moves a submitted or corrected period back to draft, recording an
    /// amendment that snapshots the filed figures.
    pub async fn reopen_with_type(
        &self,
        period_id: i64,
        reason: &str,
        amendment_type: AmendmentType,
    ) -> Result<PeriodAmendment, MtdError> {
        if reason.trim().is_empty() {
            return Err(MtdError::Validation(
                "a reason is required to reopen a period".to_string(),
            ));
        }

        let period = self.period(period_id).await?;
        let next = next_status(&period, PeriodAction::Reopen)?;

        let now = Utc::now();
        let amendment = AmendmentLedger::open(&period, amendment_type, reason, now);
        let change = self.status_change(&period, next, None);

        let created = match self.repo.reopen_period(&change, amendment).await {
            Ok(created) => created,
            Err(err) => return Err(self.lost_race(period_id, PeriodAction::Reopen, err).await),
        };

        info!(
            period_id,
            amendment_id = created.id,
            amendment_type = created.amendment_type.as_str(),
            "Reopened period for amendment"
        );
        Ok(created)
    }

    /// Files a reopened period, finalising its open amendment.
    ///
    /// # Errors
    /// * [`MtdError::InvalidTransition`] unless the period is a draft.
    /// * [`MtdError::NotFound`] when the period has no open amendment.
    pub async fn submit_amended_period(
        &self,
        period_id: i64,
    ) -> Result<PeriodAmendment, MtdError> {
        let period = self.period(period_id).await?;
        let next = next_status(&period, PeriodAction::SubmitAmendment)?;

        let amendment = self
            .repo
            .latest_amendment(period_id)
            .await?
            .filter(PeriodAmendment::is_open)
            .ok_or_else(|| MtdError::NotFound(format!("open amendment for period {period_id}")))?;

        let now = Utc::now();
        let finalization = AmendmentLedger::finalize(&amendment, &period, now);
        let change = self.status_change(&period, next, Some(now));

        if let Err(err) = self.repo.resubmit_period(&change, &finalization).await {
            return Err(self
                .lost_race(period_id, PeriodAction::SubmitAmendment, err)
                .await);
        }

        info!(
            period_id,
            amendment_id = amendment.id,
            income_difference = %finalization.income_difference,
            expenses_difference = %finalization.expenses_difference,
            "Submitted amended period"
        );

        Ok(PeriodAmendment {
            new_income: finalization.new_income,
            new_expenses: finalization.new_expenses,
            income_difference: finalization.income_difference,
            expenses_difference: finalization.expenses_difference,
            submitted_at: Some(finalization.submitted_at),
            ..amendment
        })
    }

    /// All of the owner's periods for a tax year, in quarter order.
    pub async fn periods(
        &self,
        tax_year: i32,
    ) -> Result<Vec<TaxPeriod>, MtdError> {
        Ok(self.repo.list_tax_periods(&self.owner_id, tax_year).await?)
    }

    pub async fn period(
        &self,
        period_id: i64,
    ) -> Result<TaxPeriod, MtdError> {
        self.repo
            .get_tax_period(&self.owner_id, period_id)
            .await
            .map_err(not_found(format!("period {period_id}")))
    }

    /// Draft periods whose filing deadline is before `today`.
    pub async fn overdue_periods(
        &self,
        tax_year: i32,
        today: NaiveDate,
    ) -> Result<Vec<TaxPeriod>, MtdError> {
        Ok(self
            .periods(tax_year)
            .await?
            .into_iter()
            .filter(|p| p.is_overdue(today))
            .collect())
    }

    fn status_change(
        &self,
        period: &TaxPeriod,
        to: PeriodStatus,
        submitted_at: Option<chrono::DateTime<Utc>>,
    ) -> StatusChange {
        StatusChange {
            owner_id: self.owner_id.clone(),
            period_id: period.id,
            from: period.status,
            to,
            submitted_at,
            changed_at: Utc::now(),
        }
    }

    /// A compare-and-swap conflict means another caller moved the period
    /// first; report it against the status the period has now.
    async fn lost_race(
        &self,
        period_id: i64,
        action: PeriodAction,
        err: RepositoryError,
    ) -> MtdError {
        match err {
            RepositoryError::Conflict(detail) => {
                warn!(period_id, action = action.as_str(), %detail, "Lost status race");
                match self.period(period_id).await {
                    Ok(current) => MtdError::InvalidTransition {
                        period_id,
                        from: current.status,
                        action,
                    },
                    Err(err) => err,
                }
            }
            RepositoryError::NotFound => MtdError::NotFound(format!("period {period_id}")),
            other => other.into(),
        }
    }
}

fn next_status(
    period: &TaxPeriod,
    action: PeriodAction,
) -> Result<PeriodStatus, MtdError> {
    period
        .status
        .apply(action)
        .ok_or(MtdError::InvalidTransition {
            period_id: period.id,
            from: period.status,
            action,
        })
}
