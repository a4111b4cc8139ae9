use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::error;

use crate::models::{
    AmendmentFinalization, BusinessProfile, EopsSubmission, ExpenseTransaction,
    IncomeTransaction, NewExpenseTransaction, NewIncomeTransaction, NewPeriodAmendment,
    NewTaxAdjustment, NewTaxPeriod, NewVatSubmission, PeriodAmendment, PeriodStatus,
    TaxAdjustment, TaxPeriod, TaxYearRates, UpsertEopsSubmission, VatSubmission,
};

#[derive(Debug, Error, PartialEq)]
pub enum RepositoryError {
    #[error("Record not found")]
    NotFound,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A compare-and-swap write found the row in an unexpected state, or a
    /// uniqueness constraint was violated.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The first of two dependent writes succeeded and the second did not.
    #[error("Partial write: {0}")]
    PartialWrite(String),
}

/// A compare-and-swap move of one period from `from` to `to`.
///
/// `submitted_at` overwrites the stored timestamp when present and leaves it
/// untouched otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub owner_id: String,
    pub period_id: i64,
    pub from: PeriodStatus,
    pub to: PeriodStatus,
    pub submitted_at: Option<DateTime<Utc>>,
    pub changed_at: DateTime<Utc>,
}

#[async_trait]
pub trait MtdRepository: Send + Sync {
    // Tax year rates
    async fn get_tax_year_rates(&self, tax_year: i32) -> Result<TaxYearRates, RepositoryError>;
    async fn list_tax_years(&self) -> Result<Vec<i32>, RepositoryError>;

    // Tax periods
    /// Fails with [`RepositoryError::Conflict`] if the owner already has
    /// this quarter.
    async fn create_tax_period(&self, period: NewTaxPeriod) -> Result<TaxPeriod, RepositoryError>;

    async fn get_tax_period(
        &self,
        owner_id: &str,
        period_id: i64,
    ) -> Result<TaxPeriod, RepositoryError>;

    /// Periods ordered by quarter number.
    async fn list_tax_periods(
        &self,
        owner_id: &str,
        tax_year: i32,
    ) -> Result<Vec<TaxPeriod>, RepositoryError>;

    async fn update_period_totals(
        &self,
        owner_id: &str,
        period_id: i64,
        total_income: Decimal,
        total_expenses: Decimal,
    ) -> Result<TaxPeriod, RepositoryError>;

    /// Applies `change` only if the period is still in `change.from`.
    async fn transition_period(&self, change: &StatusChange) -> Result<(), RepositoryError>;

    // Amendments
    async fn create_amendment(
        &self,
        amendment: NewPeriodAmendment,
    ) -> Result<PeriodAmendment, RepositoryError>;

    /// Most recent amendment by `created_at`, newest id breaking ties.
    async fn latest_amendment(
        &self,
        period_id: i64,
    ) -> Result<Option<PeriodAmendment>, RepositoryError>;

    /// Every amendment for the period, newest first.
    async fn list_amendments(
        &self,
        period_id: i64,
    ) -> Result<Vec<PeriodAmendment>, RepositoryError>;

    /// Writes the final figures onto an amendment that is still open.
    async fn finalize_amendment(
        &self,
        finalization: &AmendmentFinalization,
    ) -> Result<(), RepositoryError>;

    /// Records an amendment and moves the period back to draft.
    ///
    /// Backends that cannot make both writes atomic keep this default,
    /// which delegates to [`reopen_sequentially`].
    async fn reopen_period(
        &self,
        change: &StatusChange,
        amendment: NewPeriodAmendment,
    ) -> Result<PeriodAmendment, RepositoryError> {
        reopen_sequentially(self, change, amendment).await
    }

    /// Finalises the open amendment and marks the period corrected.
    ///
    /// Defaults to [`resubmit_sequentially`].
    async fn resubmit_period(
        &self,
        change: &StatusChange,
        finalization: &AmendmentFinalization,
    ) -> Result<(), RepositoryError> {
        resubmit_sequentially(self, change, finalization).await
    }

    // Transactions
    async fn create_income(
        &self,
        income: NewIncomeTransaction,
    ) -> Result<IncomeTransaction, RepositoryError>;

    async fn create_expense(
        &self,
        expense: NewExpenseTransaction,
    ) -> Result<ExpenseTransaction, RepositoryError>;

    /// Inserts a whole import.
    ///
    /// The default inserts row by row, so a failure part way leaves the
    /// earlier rows stored. Backends with transactions store all or none.
    async fn create_incomes(
        &self,
        incomes: Vec<NewIncomeTransaction>,
    ) -> Result<Vec<IncomeTransaction>, RepositoryError> {
        let mut created = Vec::with_capacity(incomes.len());
        for income in incomes {
            created.push(self.create_income(income).await?);
        }
        Ok(created)
    }

    /// See [`MtdRepository::create_incomes`].
    async fn create_expenses(
        &self,
        expenses: Vec<NewExpenseTransaction>,
    ) -> Result<Vec<ExpenseTransaction>, RepositoryError> {
        let mut created = Vec::with_capacity(expenses.len());
        for expense in expenses {
            created.push(self.create_expense(expense).await?);
        }
        Ok(created)
    }

    /// Income dated within `[start, end]`, both ends inclusive.
    async fn income_between(
        &self,
        owner_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<IncomeTransaction>, RepositoryError>;

    /// Expenses dated within `[start, end]`, both ends inclusive.
    async fn expenses_between(
        &self,
        owner_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ExpenseTransaction>, RepositoryError>;

    // Business profile
    async fn get_business_profile(
        &self,
        owner_id: &str,
    ) -> Result<Option<BusinessProfile>, RepositoryError>;

    async fn upsert_business_profile(
        &self,
        profile: &BusinessProfile,
    ) -> Result<(), RepositoryError>;

    // Tax adjustments
    async fn create_adjustment(
        &self,
        adjustment: NewTaxAdjustment,
    ) -> Result<TaxAdjustment, RepositoryError>;

    /// See [`MtdRepository::create_incomes`].
    async fn create_adjustments(
        &self,
        adjustments: Vec<NewTaxAdjustment>,
    ) -> Result<Vec<TaxAdjustment>, RepositoryError> {
        let mut created = Vec::with_capacity(adjustments.len());
        for adjustment in adjustments {
            created.push(self.create_adjustment(adjustment).await?);
        }
        Ok(created)
    }

    async fn list_adjustments(
        &self,
        owner_id: &str,
        tax_year: i32,
    ) -> Result<Vec<TaxAdjustment>, RepositoryError>;

    // End of Period Statements
    async fn get_eops_submission(
        &self,
        owner_id: &str,
        tax_year: i32,
    ) -> Result<Option<EopsSubmission>, RepositoryError>;

    /// Inserts or replaces the statement for `(owner_id, tax_year)`,
    /// preserving the original id and `created_at`.
    async fn upsert_eops_submission(
        &self,
        submission: UpsertEopsSubmission,
    ) -> Result<EopsSubmission, RepositoryError>;

    // VAT submissions
    async fn create_vat_submission(
        &self,
        submission: NewVatSubmission,
    ) -> Result<VatSubmission, RepositoryError>;

    /// Newest first.
    async fn list_vat_submissions(
        &self,
        owner_id: &str,
    ) -> Result<Vec<VatSubmission>, RepositoryError>;
}

/// Reopen as two ordered writes.
///
/// The amendment is written first and the status change is the commit
/// point. If the status change fails the amendment row is orphaned, so the
/// failure is logged and reported as [`RepositoryError::PartialWrite`].
pub async fn reopen_sequentially<R: MtdRepository + ?Sized>(
    repo: &R,
    change: &StatusChange,
    amendment: NewPeriodAmendment,
) -> Result<PeriodAmendment, RepositoryError> {
    let created = repo.create_amendment(amendment).await?;
    match repo.transition_period(change).await {
        Ok(()) => Ok(created),
        Err(err) => {
            error!(
                period_id = change.period_id,
                amendment_id = created.id,
                error = %err,
                "Amendment recorded but period was not reopened; manual repair needed"
            );
            Err(RepositoryError::PartialWrite(format!(
                "amendment {} recorded for period {} but status change failed: {err}",
                created.id, change.period_id
            )))
        }
    }
}

/// Resubmit as two ordered writes, with the same commit point as
/// [`reopen_sequentially`].
pub async fn resubmit_sequentially<R: MtdRepository + ?Sized>(
    repo: &R,
    change: &StatusChange,
    finalization: &AmendmentFinalization,
) -> Result<(), RepositoryError> {
    repo.finalize_amendment(finalization).await?;
    repo.transition_period(change).await.map_err(|err| {
        error!(
            period_id = change.period_id,
            amendment_id = finalization.amendment_id,
            error = %err,
            "Amendment finalised but period was not marked corrected; manual repair needed"
        );
        RepositoryError::PartialWrite(format!(
            "amendment {} finalised for period {} but status change failed: {err}",
            finalization.amendment_id, change.period_id
        ))
    })
}
