//! End of Period Statement filing.

use chrono::Utc;
use tracing::{info, warn};

use super::{not_found, require_owner};
use crate::calculations::year_end::{YearEndStatement, build_year_end_statement};
use crate::db::MtdRepository;
use crate::error::MtdError;
use crate::models::{
    EopsDeclarations, EopsStatus, EopsSubmission, PeriodStatus, UpsertEopsSubmission,
};

pub struct EopsFiling<'a> {
    repo: &'a dyn MtdRepository,
    owner_id: String,
}

impl<'a> EopsFiling<'a> {
    pub fn new(
        repo: &'a dyn MtdRepository,
        owner: Option<&str>,
    ) -> Result<Self, MtdError> {
        Ok(Self {
            repo,
            owner_id: require_owner(owner)?,
        })
    }

    /// Year-end figures from the stored quarterly totals.
    ///
    /// # Errors
    /// [`MtdError::NotFound`] unless all four quarters exist and rates are
    /// configured for the year.
    pub async fn preview(
        &self,
        tax_year: i32,
    ) -> Result<YearEndStatement, MtdError> {
        let periods = self.repo.list_tax_periods(&self.owner_id, tax_year).await?;
        if periods.len() < 4 {
            return Err(MtdError::NotFound(format!(
                "all four quarters for tax year {tax_year} (found {})",
                periods.len()
            )));
        }

        let unfiled: Vec<&str> = periods
            .iter()
            .filter(|p| p.status == PeriodStatus::Draft)
            .map(|p| p.period_key.as_str())
            .collect();
        if !unfiled.is_empty() {
            warn!(tax_year, ?unfiled, "Year-end statement includes unfiled quarters");
        }

        let adjustments = self.repo.list_adjustments(&self.owner_id, tax_year).await?;
        let rates = self
            .repo
            .get_tax_year_rates(tax_year)
            .await
            .map_err(not_found(format!("tax year rates for {tax_year}")))?;

        Ok(build_year_end_statement(
            tax_year,
            &periods,
            &adjustments,
            &rates,
        ))
    }

    /// Saves the current figures as a draft statement.
    ///
    /// # Errors
    /// [`MtdError::Validation`] if the year has already been filed; a draft
    /// never replaces a filed statement.
    pub async fn save_draft(
        &self,
        tax_year: i32,
        declarations: EopsDeclarations,
    ) -> Result<EopsSubmission, MtdError> {
        if let Some(existing) = self.existing(tax_year).await? {
            if existing.status.is_filed() {
                return Err(MtdError::Validation(format!(
                    "tax year {tax_year} is already {}",
                    existing.status.as_str()
                )));
            }
        }

        let statement = self.preview(tax_year).await?;
        let saved = self
            .repo
            .upsert_eops_submission(self.row(&statement, EopsStatus::Draft, declarations, None))
            .await?;

        info!(tax_year, submission_id = saved.id, "Saved draft year-end statement");
        Ok(saved)
    }

    /// Files the statement, which requires every declaration.
    ///
    /// Filing a year again with different figures records it as amended.
    /// When nothing has changed since the last filing the stored statement
    /// is returned as it is.
    pub async fn submit(
        &self,
        tax_year: i32,
        declarations: EopsDeclarations,
    ) -> Result<EopsSubmission, MtdError> {
        let missing = declarations.missing();
        if !missing.is_empty() {
            return Err(MtdError::MissingDeclaration(missing));
        }

        let statement = self.preview(tax_year).await?;
        let mut row = self.row(&statement, EopsStatus::Submitted, declarations, Some(Utc::now()));
        let filed = self
            .existing(tax_year)
            .await?
            .filter(|existing| existing.status.is_filed());
        if let Some(existing) = filed {
            if same_filing(&existing, &row) {
                info!(
                    tax_year,
                    submission_id = existing.id,
                    "Year-end statement unchanged since it was filed"
                );
                return Ok(existing);
            }
            row.status = EopsStatus::Amended;
        }

        let saved = self.repo.upsert_eops_submission(row).await?;

        info!(
            tax_year,
            submission_id = saved.id,
            status = saved.status.as_str(),
            tax_due = %saved.tax_due,
            "Submitted year-end statement"
        );
        Ok(saved)
    }

    pub async fn existing(
        &self,
        tax_year: i32,
    ) -> Result<Option<EopsSubmission>, MtdError> {
        Ok(self
            .repo
            .get_eops_submission(&self.owner_id, tax_year)
            .await?)
    }

    fn row(
        &self,
        statement: &YearEndStatement,
        status: EopsStatus,
        declarations: EopsDeclarations,
        submitted_at: Option<chrono::DateTime<Utc>>,
    ) -> UpsertEopsSubmission {
        UpsertEopsSubmission {
            owner_id: self.owner_id.clone(),
            tax_year: statement.tax_year,
            status,
            total_income: statement.total_income,
            total_expenses: statement.total_expenses,
            total_adjustments: statement.adjustments.net_adjustment,
            net_profit: statement.net_profit,
            taxable_profit: statement.taxable_profit,
            tax_due: statement.tax_due,
            declarations,
            submitted_at,
            hmrc_submission_id: None,
        }
    }
}

/// Same figures and declarations as the stored statement.
fn same_filing(
    existing: &EopsSubmission,
    row: &UpsertEopsSubmission,
) -> bool {
    existing.total_income == row.total_income
        && existing.total_expenses == row.total_expenses
        && existing.total_adjustments == row.total_adjustments
        && existing.net_profit == row.net_profit
        && existing.taxable_profit == row.taxable_profit
        && existing.tax_due == row.tax_due
        && existing.declarations == row.declarations
}
