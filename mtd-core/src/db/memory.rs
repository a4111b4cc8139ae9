//! Process-local storage backend.
//!
//! Everything lives behind one mutex, so every method, including the
//! compound reopen and resubmit operations, is atomic with respect to every
//! other. Data is lost when the repository is dropped.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;

use super::factory::{DbConfig, RepositoryFactory};
use super::repository::{MtdRepository, RepositoryError, StatusChange};
use crate::models::{
    AmendmentFinalization, BusinessProfile, EopsSubmission, ExpenseTransaction,
    IncomeTransaction, NewExpenseTransaction, NewIncomeTransaction, NewPeriodAmendment,
    NewTaxAdjustment, NewTaxPeriod, NewVatSubmission, PeriodAmendment, PeriodStatus,
    TaxAdjustment, TaxPeriod, TaxYearRates, UpsertEopsSubmission, VatSubmission,
};

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    rates: BTreeMap<i32, TaxYearRates>,
    periods: BTreeMap<i64, TaxPeriod>,
    amendments: BTreeMap<i64, PeriodAmendment>,
    income: Vec<IncomeTransaction>,
    expenses: Vec<ExpenseTransaction>,
    profiles: HashMap<String, BusinessProfile>,
    adjustments: Vec<TaxAdjustment>,
    eops: BTreeMap<(String, i32), EopsSubmission>,
    vat: Vec<VatSubmission>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn push_income(
        &mut self,
        income: NewIncomeTransaction,
    ) -> IncomeTransaction {
        let created = IncomeTransaction {
            id: self.next_id(),
            owner_id: income.owner_id,
            transaction_date: income.transaction_date,
            amount: income.amount,
            vat_rate: income.vat_rate,
            description: income.description,
        };
        self.income.push(created.clone());
        created
    }

    fn push_expense(
        &mut self,
        expense: NewExpenseTransaction,
    ) -> ExpenseTransaction {
        let created = ExpenseTransaction {
            id: self.next_id(),
            owner_id: expense.owner_id,
            transaction_date: expense.transaction_date,
            amount: expense.amount,
            vat_rate: expense.vat_rate,
            description: expense.description,
            disallowable_amount: expense.disallowable_amount,
        };
        self.expenses.push(created.clone());
        created
    }

    fn push_adjustment(
        &mut self,
        adjustment: NewTaxAdjustment,
    ) -> TaxAdjustment {
        let created = TaxAdjustment {
            id: self.next_id(),
            owner_id: adjustment.owner_id,
            tax_year: adjustment.tax_year,
            description: adjustment.description,
            amount: adjustment.amount,
            is_addition: adjustment.is_addition,
        };
        self.adjustments.push(created.clone());
        created
    }

    fn owned_period(
        &self,
        owner_id: &str,
        period_id: i64,
    ) -> Result<&TaxPeriod, RepositoryError> {
        self.periods
            .get(&period_id)
            .filter(|p| p.owner_id == owner_id)
            .ok_or(RepositoryError::NotFound)
    }

    fn check_transition(
        &self,
        change: &StatusChange,
    ) -> Result<(), RepositoryError> {
        let period = self.owned_period(&change.owner_id, change.period_id)?;
        if period.status != change.from {
            return Err(RepositoryError::Conflict(format!(
                "period {} is {}, expected {}",
                change.period_id, period.status, change.from
            )));
        }
        Ok(())
    }

    fn apply_transition(
        &mut self,
        change: &StatusChange,
    ) -> Result<(), RepositoryError> {
        self.check_transition(change)?;
        let period = self
            .periods
            .get_mut(&change.period_id)
            .ok_or(RepositoryError::NotFound)?;
        period.status = change.to;
        if change.submitted_at.is_some() {
            period.submitted_at = change.submitted_at;
        }
        period.updated_at = change.changed_at;
        Ok(())
    }

    fn insert_amendment(
        &mut self,
        amendment: NewPeriodAmendment,
    ) -> Result<PeriodAmendment, RepositoryError> {
        if !self.periods.contains_key(&amendment.tax_period_id) {
            return Err(RepositoryError::NotFound);
        }
        let id = self.next_id();
        let created = PeriodAmendment {
            id,
            tax_period_id: amendment.tax_period_id,
            amendment_type: amendment.amendment_type,
            reason: amendment.reason,
            previous_income: amendment.previous_income,
            previous_expenses: amendment.previous_expenses,
            new_income: amendment.previous_income,
            new_expenses: amendment.previous_expenses,
            income_difference: Decimal::ZERO,
            expenses_difference: Decimal::ZERO,
            created_at: amendment.created_at,
            submitted_at: None,
        };
        self.amendments.insert(id, created.clone());
        Ok(created)
    }

    fn open_amendment_mut(
        &mut self,
        amendment_id: i64,
    ) -> Result<&mut PeriodAmendment, RepositoryError> {
        let amendment = self
            .amendments
            .get_mut(&amendment_id)
            .ok_or(RepositoryError::NotFound)?;
        if !amendment.is_open() {
            return Err(RepositoryError::Conflict(format!(
                "amendment {amendment_id} is already finalised"
            )));
        }
        Ok(amendment)
    }

    fn check_finalization(
        &mut self,
        finalization: &AmendmentFinalization,
    ) -> Result<(), RepositoryError> {
        self.open_amendment_mut(finalization.amendment_id).map(|_| ())
    }

    fn apply_finalization(
        &mut self,
        finalization: &AmendmentFinalization,
    ) -> Result<(), RepositoryError> {
        let amendment = self.open_amendment_mut(finalization.amendment_id)?;
        amendment.new_income = finalization.new_income;
        amendment.new_expenses = finalization.new_expenses;
        amendment.income_difference = finalization.income_difference;
        amendment.expenses_difference = finalization.expenses_difference;
        amendment.submitted_at = Some(finalization.submitted_at);
        Ok(())
    }
}

/// [`MtdRepository`] kept entirely in memory.
///
/// Rates for 2024 and 2025 are available from construction.
pub struct InMemoryRepository {
    state: Mutex<MemoryState>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        let mut state = MemoryState::default();
        for rates in [TaxYearRates::uk_2024_25(), TaxYearRates::frozen_for(2025)] {
            state.rates.insert(rates.tax_year, rates);
        }
        Self {
            state: Mutex::new(state),
        }
    }

    /// Adds or replaces the rates for one tax year.
    pub fn with_rates(
        self,
        rates: TaxYearRates,
    ) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.rates.insert(rates.tax_year, rates);
        }
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Database("in-memory state lock poisoned".to_string()))
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MtdRepository for InMemoryRepository {
    async fn get_tax_year_rates(
        &self,
        tax_year: i32,
    ) -> Result<TaxYearRates, RepositoryError> {
        self.lock()?
            .rates
            .get(&tax_year)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    async fn list_tax_years(&self) -> Result<Vec<i32>, RepositoryError> {
        Ok(self.lock()?.rates.keys().copied().collect())
    }

    async fn create_tax_period(
        &self,
        period: NewTaxPeriod,
    ) -> Result<TaxPeriod, RepositoryError> {
        let mut state = self.lock()?;
        let duplicate = state.periods.values().any(|p| {
            p.owner_id == period.owner_id
                && p.tax_year == period.tax_year
                && p.quarter_number == period.quarter_number
        });
        if duplicate {
            return Err(RepositoryError::Conflict(format!(
                "period {} already exists for owner {}",
                period.period_key, period.owner_id
            )));
        }

        let now = Utc::now();
        let id = state.next_id();
        let created = TaxPeriod {
            id,
            owner_id: period.owner_id,
            tax_year: period.tax_year,
            quarter_number: period.quarter_number,
            period_key: period.period_key,
            start_date: period.start_date,
            end_date: period.end_date,
            deadline_date: period.deadline_date,
            status: crate::models::PeriodStatus::Draft,
            submitted_at: None,
            total_income: Decimal::ZERO,
            total_expenses: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        };
        state.periods.insert(id, created.clone());
        Ok(created)
    }

    async fn get_tax_period(
        &self,
        owner_id: &str,
        period_id: i64,
    ) -> Result<TaxPeriod, RepositoryError> {
        self.lock()?.owned_period(owner_id, period_id).cloned()
    }

    async fn list_tax_periods(
        &self,
        owner_id: &str,
        tax_year: i32,
    ) -> Result<Vec<TaxPeriod>, RepositoryError> {
        let state = self.lock()?;
        let mut periods: Vec<TaxPeriod> = state
            .periods
            .values()
            .filter(|p| p.owner_id == owner_id && p.tax_year == tax_year)
            .cloned()
            .collect();
        periods.sort_by_key(|p| p.quarter_number);
        Ok(periods)
    }

    async fn update_period_totals(
        &self,
        owner_id: &str,
        period_id: i64,
        total_income: Decimal,
        total_expenses: Decimal,
    ) -> Result<TaxPeriod, RepositoryError> {
        let mut state = self.lock()?;
        let status = state.owned_period(owner_id, period_id)?.status;
        if status != PeriodStatus::Draft {
            return Err(RepositoryError::Conflict(format!(
                "period {period_id} is {status}, totals are fixed"
            )));
        }
        let period = state
            .periods
            .get_mut(&period_id)
            .ok_or(RepositoryError::NotFound)?;
        period.total_income = total_income;
        period.total_expenses = total_expenses;
        period.updated_at = Utc::now();
        Ok(period.clone())
    }

    async fn transition_period(
        &self,
        change: &StatusChange,
    ) -> Result<(), RepositoryError> {
        self.lock()?.apply_transition(change)
    }

    async fn create_amendment(
        &self,
        amendment: NewPeriodAmendment,
    ) -> Result<PeriodAmendment, RepositoryError> {
        self.lock()?.insert_amendment(amendment)
    }

    async fn latest_amendment(
        &self,
        period_id: i64,
    ) -> Result<Option<PeriodAmendment>, RepositoryError> {
        Ok(self
            .lock()?
            .amendments
            .values()
            .filter(|a| a.tax_period_id == period_id)
            .max_by_key(|a| (a.created_at, a.id))
            .cloned())
    }

    async fn list_amendments(
        &self,
        period_id: i64,
    ) -> Result<Vec<PeriodAmendment>, RepositoryError> {
        let mut amendments: Vec<PeriodAmendment> = self
            .lock()?
            .amendments
            .values()
            .filter(|a| a.tax_period_id == period_id)
            .cloned()
            .collect();
        amendments.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(amendments)
    }

    async fn finalize_amendment(
        &self,
        finalization: &AmendmentFinalization,
    ) -> Result<(), RepositoryError> {
        self.lock()?.apply_finalization(finalization)
    }

    async fn reopen_period(
        &self,
        change: &StatusChange,
        amendment: NewPeriodAmendment,
    ) -> Result<PeriodAmendment, RepositoryError> {
        let mut state = self.lock()?;
        state.check_transition(change)?;
        let created = state.insert_amendment(amendment)?;
        state.apply_transition(change)?;
        Ok(created)
    }

    async fn resubmit_period(
        &self,
        change: &StatusChange,
        finalization: &AmendmentFinalization,
    ) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        state.check_transition(change)?;
        state.check_finalization(finalization)?;
        state.apply_finalization(finalization)?;
        state.apply_transition(change)
    }

    async fn create_income(
        &self,
        income: NewIncomeTransaction,
    ) -> Result<IncomeTransaction, RepositoryError> {
        Ok(self.lock()?.push_income(income))
    }

    async fn create_incomes(
        &self,
        incomes: Vec<NewIncomeTransaction>,
    ) -> Result<Vec<IncomeTransaction>, RepositoryError> {
        let mut state = self.lock()?;
        Ok(incomes.into_iter().map(|income| state.push_income(income)).collect())
    }

    async fn create_expense(
        &self,
        expense: NewExpenseTransaction,
    ) -> Result<ExpenseTransaction, RepositoryError> {
        Ok(self.lock()?.push_expense(expense))
    }

    async fn create_expenses(
        &self,
        expenses: Vec<NewExpenseTransaction>,
    ) -> Result<Vec<ExpenseTransaction>, RepositoryError> {
        let mut state = self.lock()?;
        Ok(expenses.into_iter().map(|expense| state.push_expense(expense)).collect())
    }

    async fn income_between(
        &self,
        owner_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<IncomeTransaction>, RepositoryError> {
        Ok(self
            .lock()?
            .income
            .iter()
            .filter(|t| {
                t.owner_id == owner_id && t.transaction_date >= start && t.transaction_date <= end
            })
            .cloned()
            .collect())
    }

    async fn expenses_between(
        &self,
        owner_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ExpenseTransaction>, RepositoryError> {
        Ok(self
            .lock()?
            .expenses
            .iter()
            .filter(|t| {
                t.owner_id == owner_id && t.transaction_date >= start && t.transaction_date <= end
            })
            .cloned()
            .collect())
    }

    async fn get_business_profile(
        &self,
        owner_id: &str,
    ) -> Result<Option<BusinessProfile>, RepositoryError> {
        Ok(self.lock()?.profiles.get(owner_id).cloned())
    }

    async fn upsert_business_profile(
        &self,
        profile: &BusinessProfile,
    ) -> Result<(), RepositoryError> {
        self.lock()?
            .profiles
            .insert(profile.owner_id.clone(), profile.clone());
        Ok(())
    }

    async fn create_adjustment(
        &self,
        adjustment: NewTaxAdjustment,
    ) -> Result<TaxAdjustment, RepositoryError> {
        Ok(self.lock()?.push_adjustment(adjustment))
    }

    async fn create_adjustments(
        &self,
        adjustments: Vec<NewTaxAdjustment>,
    ) -> Result<Vec<TaxAdjustment>, RepositoryError> {
        let mut state = self.lock()?;
        Ok(adjustments.into_iter().map(|adjustment| state.push_adjustment(adjustment)).collect())
    }

    async fn list_adjustments(
        &self,
        owner_id: &str,
        tax_year: i32,
    ) -> Result<Vec<TaxAdjustment>, RepositoryError> {
        Ok(self
            .lock()?
            .adjustments
            .iter()
            .filter(|a| a.owner_id == owner_id && a.tax_year == tax_year)
            .cloned()
            .collect())
    }

    async fn get_eops_submission(
        &self,
        owner_id: &str,
        tax_year: i32,
    ) -> Result<Option<EopsSubmission>, RepositoryError> {
        Ok(self
            .lock()?
            .eops
            .get(&(owner_id.to_string(), tax_year))
            .cloned())
    }

    async fn upsert_eops_submission(
        &self,
        submission: UpsertEopsSubmission,
    ) -> Result<EopsSubmission, RepositoryError> {
        let mut state = self.lock()?;
        let key = (submission.owner_id.clone(), submission.tax_year);
        let now = Utc::now();
        let (id, created_at) = match state.eops.get(&key) {
            Some(existing) => (existing.id, existing.created_at),
            None => (state.next_id(), now),
        };

        let stored = EopsSubmission {
            id,
            owner_id: submission.owner_id,
            tax_year: submission.tax_year,
            status: submission.status,
            total_income: submission.total_income,
            total_expenses: submission.total_expenses,
            total_adjustments: submission.total_adjustments,
            net_profit: submission.net_profit,
            taxable_profit: submission.taxable_profit,
            tax_due: submission.tax_due,
            declarations: submission.declarations,
            submitted_at: submission.submitted_at,
            hmrc_submission_id: submission.hmrc_submission_id,
            created_at,
            updated_at: now,
        };
        state.eops.insert(key, stored.clone());
        Ok(stored)
    }

    async fn create_vat_submission(
        &self,
        submission: NewVatSubmission,
    ) -> Result<VatSubmission, RepositoryError> {
        let mut state = self.lock()?;
        let created = VatSubmission {
            id: state.next_id(),
            owner_id: submission.owner_id,
            period_key: submission.period_key,
            period_start: submission.period_start,
            period_end: submission.period_end,
            boxes: submission.boxes,
            submitted_at: submission.submitted_at,
        };
        state.vat.push(created.clone());
        Ok(created)
    }

    async fn list_vat_submissions(
        &self,
        owner_id: &str,
    ) -> Result<Vec<VatSubmission>, RepositoryError> {
        let mut submissions: Vec<VatSubmission> = self
            .lock()?
            .vat
            .iter()
            .filter(|s| s.owner_id == owner_id)
            .cloned()
            .collect();
        submissions.sort_by(|a, b| (b.submitted_at, b.id).cmp(&(a.submitted_at, a.id)));
        Ok(submissions)
    }
}

/// Factory for the `"memory"` backend. The connection string is ignored.
pub struct MemoryRepositoryFactory;

#[async_trait]
impl RepositoryFactory for MemoryRepositoryFactory {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn create(
        &self,
        _config: &DbConfig,
    ) -> Result<Box<dyn MtdRepository>, RepositoryError> {
        Ok(Box::new(InMemoryRepository::new()))
    }
}
