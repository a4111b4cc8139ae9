use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use mtd_core::calculations::VatBoxes;
use mtd_core::{
    AmendmentFinalization, AmendmentType, BusinessProfile, EopsDeclarations, EopsStatus,
    EopsSubmission, ExpenseTransaction, IncomeTransaction, MtdRepository, NewExpenseTransaction,
    NewIncomeTransaction, NewPeriodAmendment, NewTaxAdjustment, NewTaxPeriod, NewVatSubmission,
    PeriodAmendment, PeriodStatus, RepositoryError, StatusChange, TaxAdjustment, TaxPeriod,
    TaxYearRates, UpsertEopsSubmission, VatSubmission,
};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Decode, Row, Sqlite, Type};
use tracing::{debug, info};

use crate::decimal::{decimal_to_text, get_decimal, get_optional_decimal};

const PERIOD_SELECT: &str = "SELECT id, owner_id, tax_year, quarter_number, period_key,
        start_date, end_date, deadline_date, status, submitted_at,
        total_income, total_expenses, created_at, updated_at
 FROM tax_periods";

const AMENDMENT_SELECT: &str = "SELECT id, tax_period_id, amendment_type, reason,
        previous_income, previous_expenses, new_income, new_expenses,
        income_difference, expenses_difference, created_at, submitted_at
 FROM period_amendments";

const EOPS_SELECT: &str = "SELECT id, owner_id, tax_year, status, total_income, total_expenses,
        total_adjustments, net_profit, taxable_profit, tax_due,
        accounts_finalised, all_income_declared, all_expenses_claimed, adjustments_reviewed,
        submitted_at, hmrc_submission_id, created_at, updated_at
 FROM eops_submissions";

const VAT_SELECT: &str = "SELECT id, owner_id, period_key, period_start, period_end,
        box1, box2, box3, box4, box5, box6, box7, box8, box9, submitted_at
 FROM vat_submissions";

pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Open `database_url`, creating the file if needed.
    ///
    /// In-memory databases get a single long-lived connection so every
    /// query sees the same data.
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL: {}", database_url))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool_options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to connect to database: {}", database_url))?;
        Ok(Self { pool })
    }

    pub async fn new_with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(())
    }

    /// Load and execute all SQL seed files from the specified directory.
    /// Files are executed in alphabetical order by filename.
    pub async fn run_seeds(
        &self,
        seeds_dir: &Path,
    ) -> Result<()> {
        let mut entries: Vec<_> = std::fs::read_dir(seeds_dir)
            .with_context(|| format!("Failed to read seeds directory '{}'", seeds_dir.display()))?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "sql"))
            .collect();

        entries.sort_by_key(|entry| entry.file_name());

        for entry in entries {
            let path = entry.path();
            let sql = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read seed file '{}'", path.display()))?;

            sqlx::raw_sql(&sql)
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to execute seed file '{}'", path.display()))?;
            debug!(seed = %path.display(), "Applied seed file");
        }

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn connection(&self) -> Result<sqlx::pool::PoolConnection<Sqlite>, RepositoryError> {
        self.pool
            .acquire()
            .await
            .map_err(|e| RepositoryError::Connection(e.to_string()))
    }
}

fn database(e: sqlx::Error) -> RepositoryError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepositoryError::Conflict(db.message().to_string())
        }
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => RepositoryError::NotFound,
        _ => RepositoryError::Database(e.to_string()),
    }
}

fn column<'r, T>(
    row: &'r SqliteRow,
    name: &str,
) -> Result<T, RepositoryError>
where
    T: Decode<'r, Sqlite> + Type<Sqlite>,
{
    row.try_get(name)
        .map_err(|e| RepositoryError::Database(format!("Failed to get {}: {}", name, e)))
}

fn unknown_value(
    column: &str,
    value: &str,
) -> RepositoryError {
    RepositoryError::Database(format!("Unknown value '{}' in column '{}'", value, column))
}

fn row_to_rates(row: &SqliteRow) -> Result<TaxYearRates, RepositoryError> {
    Ok(TaxYearRates {
        tax_year: column(row, "tax_year")?,
        personal_allowance: get_decimal(row, "personal_allowance")?,
        taper_threshold: get_decimal(row, "taper_threshold")?,
        basic_rate_limit: get_decimal(row, "basic_rate_limit")?,
        higher_rate_limit: get_decimal(row, "higher_rate_limit")?,
        basic_rate: get_decimal(row, "basic_rate")?,
        higher_rate: get_decimal(row, "higher_rate")?,
        additional_rate: get_decimal(row, "additional_rate")?,
        nic_lower_profits_limit: get_decimal(row, "nic_lower_profits_limit")?,
        nic_upper_profits_limit: get_decimal(row, "nic_upper_profits_limit")?,
        nic_main_rate: get_decimal(row, "nic_main_rate")?,
        nic_additional_rate: get_decimal(row, "nic_additional_rate")?,
    })
}

fn row_to_tax_period(row: &SqliteRow) -> Result<TaxPeriod, RepositoryError> {
    let quarter: i64 = column(row, "quarter_number")?;
    let status: String = column(row, "status")?;

    Ok(TaxPeriod {
        id: column(row, "id")?,
        owner_id: column(row, "owner_id")?,
        tax_year: column(row, "tax_year")?,
        quarter_number: u8::try_from(quarter)
            .map_err(|_| unknown_value("quarter_number", &quarter.to_string()))?,
        period_key: column(row, "period_key")?,
        start_date: column(row, "start_date")?,
        end_date: column(row, "end_date")?,
        deadline_date: column(row, "deadline_date")?,
        status: PeriodStatus::parse(&status).ok_or_else(|| unknown_value("status", &status))?,
        submitted_at: column(row, "submitted_at")?,
        total_income: get_decimal(row, "total_income")?,
        total_expenses: get_decimal(row, "total_expenses")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn row_to_amendment(row: &SqliteRow) -> Result<PeriodAmendment, RepositoryError> {
    let amendment_type: String = column(row, "amendment_type")?;

    Ok(PeriodAmendment {
        id: column(row, "id")?,
        tax_period_id: column(row, "tax_period_id")?,
        amendment_type: AmendmentType::parse(&amendment_type)
            .ok_or_else(|| unknown_value("amendment_type", &amendment_type))?,
        reason: column(row, "reason")?,
        previous_income: get_decimal(row, "previous_income")?,
        previous_expenses: get_decimal(row, "previous_expenses")?,
        new_income: get_decimal(row, "new_income")?,
        new_expenses: get_decimal(row, "new_expenses")?,
        income_difference: get_decimal(row, "income_difference")?,
        expenses_difference: get_decimal(row, "expenses_difference")?,
        created_at: column(row, "created_at")?,
        submitted_at: column(row, "submitted_at")?,
    })
}

fn row_to_profile(row: &SqliteRow) -> Result<BusinessProfile, RepositoryError> {
    Ok(BusinessProfile {
        owner_id: column(row, "owner_id")?,
        business_name: column(row, "business_name")?,
        vat_number: column(row, "vat_number")?,
        hmrc_connected: column(row, "hmrc_connected")?,
    })
}

fn row_to_income(row: &SqliteRow) -> Result<IncomeTransaction, RepositoryError> {
    Ok(IncomeTransaction {
        id: column(row, "id")?,
        owner_id: column(row, "owner_id")?,
        transaction_date: column(row, "transaction_date")?,
        amount: get_decimal(row, "amount")?,
        vat_rate: get_decimal(row, "vat_rate")?,
        description: column(row, "description")?,
    })
}

fn row_to_expense(row: &SqliteRow) -> Result<ExpenseTransaction, RepositoryError> {
    Ok(ExpenseTransaction {
        id: column(row, "id")?,
        owner_id: column(row, "owner_id")?,
        transaction_date: column(row, "transaction_date")?,
        amount: get_decimal(row, "amount")?,
        vat_rate: get_decimal(row, "vat_rate")?,
        description: column(row, "description")?,
        disallowable_amount: get_optional_decimal(row, "disallowable_amount")?,
    })
}

fn row_to_adjustment(row: &SqliteRow) -> Result<TaxAdjustment, RepositoryError> {
    Ok(TaxAdjustment {
        id: column(row, "id")?,
        owner_id: column(row, "owner_id")?,
        tax_year: column(row, "tax_year")?,
        description: column(row, "description")?,
        amount: get_decimal(row, "amount")?,
        is_addition: column(row, "is_addition")?,
    })
}

fn row_to_eops(row: &SqliteRow) -> Result<EopsSubmission, RepositoryError> {
    let status: String = column(row, "status")?;

    Ok(EopsSubmission {
        id: column(row, "id")?,
        owner_id: column(row, "owner_id")?,
        tax_year: column(row, "tax_year")?,
        status: EopsStatus::parse(&status).ok_or_else(|| unknown_value("status", &status))?,
        total_income: get_decimal(row, "total_income")?,
        total_expenses: get_decimal(row, "total_expenses")?,
        total_adjustments: get_decimal(row, "total_adjustments")?,
        net_profit: get_decimal(row, "net_profit")?,
        taxable_profit: get_decimal(row, "taxable_profit")?,
        tax_due: get_decimal(row, "tax_due")?,
        declarations: EopsDeclarations {
            accounts_finalised: column(row, "accounts_finalised")?,
            all_income_declared: column(row, "all_income_declared")?,
            all_expenses_claimed: column(row, "all_expenses_claimed")?,
            adjustments_reviewed: column(row, "adjustments_reviewed")?,
        },
        submitted_at: column(row, "submitted_at")?,
        hmrc_submission_id: column(row, "hmrc_submission_id")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn row_to_vat_submission(row: &SqliteRow) -> Result<VatSubmission, RepositoryError> {
    Ok(VatSubmission {
        id: column(row, "id")?,
        owner_id: column(row, "owner_id")?,
        period_key: column(row, "period_key")?,
        period_start: column(row, "period_start")?,
        period_end: column(row, "period_end")?,
        boxes: VatBoxes {
            box1: get_decimal(row, "box1")?,
            box2: get_decimal(row, "box2")?,
            box3: get_decimal(row, "box3")?,
            box4: get_decimal(row, "box4")?,
            box5: get_decimal(row, "box5")?,
            box6: get_decimal(row, "box6")?,
            box7: get_decimal(row, "box7")?,
            box8: get_decimal(row, "box8")?,
            box9: get_decimal(row, "box9")?,
        },
        submitted_at: column(row, "submitted_at")?,
    })
}

// Statement helpers shared by the plain and transactional write paths.

async fn apply_status_change(
    conn: &mut SqliteConnection,
    change: &StatusChange,
) -> Result<(), RepositoryError> {
    let result = sqlx::query(
        "UPDATE tax_periods
         SET status = ?, submitted_at = COALESCE(?, submitted_at), updated_at = ?
         WHERE id = ? AND owner_id = ? AND status = ?",
    )
    .bind(change.to.as_str())
    .bind(change.submitted_at)
    .bind(change.changed_at)
    .bind(change.period_id)
    .bind(&change.owner_id)
    .bind(change.from.as_str())
    .execute(&mut *conn)
    .await
    .map_err(database)?;

    if result.rows_affected() == 1 {
        return Ok(());
    }

    let current: Option<String> =
        sqlx::query_scalar("SELECT status FROM tax_periods WHERE id = ? AND owner_id = ?")
            .bind(change.period_id)
            .bind(&change.owner_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(database)?;

    match current {
        None => Err(RepositoryError::NotFound),
        Some(status) => Err(RepositoryError::Conflict(format!(
            "period {} is {}, expected {}",
            change.period_id, status, change.from
        ))),
    }
}

async fn insert_income(
    conn: &mut SqliteConnection,
    income: NewIncomeTransaction,
) -> Result<IncomeTransaction, RepositoryError> {
    let result = sqlx::query(
        "INSERT INTO income_transactions (
            owner_id, transaction_date, amount, vat_rate, description
        ) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&income.owner_id)
    .bind(income.transaction_date)
    .bind(decimal_to_text(income.amount))
    .bind(decimal_to_text(income.vat_rate))
    .bind(&income.description)
    .execute(&mut *conn)
    .await
    .map_err(database)?;

    Ok(IncomeTransaction {
        id: result.last_insert_rowid(),
        owner_id: income.owner_id,
        transaction_date: income.transaction_date,
        amount: income.amount,
        vat_rate: income.vat_rate,
        description: income.description,
    })
}

async fn insert_expense(
    conn: &mut SqliteConnection,
    expense: NewExpenseTransaction,
) -> Result<ExpenseTransaction, RepositoryError> {
    let result = sqlx::query(
        "INSERT INTO expense_transactions (
            owner_id, transaction_date, amount, vat_rate, description, disallowable_amount
        ) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&expense.owner_id)
    .bind(expense.transaction_date)
    .bind(decimal_to_text(expense.amount))
    .bind(decimal_to_text(expense.vat_rate))
    .bind(&expense.description)
    .bind(expense.disallowable_amount.map(decimal_to_text))
    .execute(&mut *conn)
    .await
    .map_err(database)?;

    Ok(ExpenseTransaction {
        id: result.last_insert_rowid(),
        owner_id: expense.owner_id,
        transaction_date: expense.transaction_date,
        amount: expense.amount,
        vat_rate: expense.vat_rate,
        description: expense.description,
        disallowable_amount: expense.disallowable_amount,
    })
}

async fn insert_adjustment(
    conn: &mut SqliteConnection,
    adjustment: NewTaxAdjustment,
) -> Result<TaxAdjustment, RepositoryError> {
    let result = sqlx::query(
        "INSERT INTO tax_adjustments (owner_id, tax_year, description, amount, is_addition)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&adjustment.owner_id)
    .bind(adjustment.tax_year)
    .bind(&adjustment.description)
    .bind(decimal_to_text(adjustment.amount))
    .bind(adjustment.is_addition)
    .execute(&mut *conn)
    .await
    .map_err(database)?;

    Ok(TaxAdjustment {
        id: result.last_insert_rowid(),
        owner_id: adjustment.owner_id,
        tax_year: adjustment.tax_year,
        description: adjustment.description,
        amount: adjustment.amount,
        is_addition: adjustment.is_addition,
    })
}

async fn insert_amendment(
    conn: &mut SqliteConnection,
    amendment: NewPeriodAmendment,
) -> Result<PeriodAmendment, RepositoryError> {
    let result = sqlx::query(
        "INSERT INTO period_amendments (
            tax_period_id, amendment_type, reason,
            previous_income, previous_expenses, new_income, new_expenses,
            income_difference, expenses_difference, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, '0', '0', ?)",
    )
    .bind(amendment.tax_period_id)
    .bind(amendment.amendment_type.as_str())
    .bind(&amendment.reason)
    .bind(decimal_to_text(amendment.previous_income))
    .bind(decimal_to_text(amendment.previous_expenses))
    .bind(decimal_to_text(amendment.previous_income))
    .bind(decimal_to_text(amendment.previous_expenses))
    .bind(amendment.created_at)
    .execute(&mut *conn)
    .await
    .map_err(database)?;

    let row = sqlx::query(&format!("{AMENDMENT_SELECT} WHERE id = ?"))
        .bind(result.last_insert_rowid())
        .fetch_one(&mut *conn)
        .await
        .map_err(database)?;

    row_to_amendment(&row)
}

async fn apply_finalization(
    conn: &mut SqliteConnection,
    finalization: &AmendmentFinalization,
) -> Result<(), RepositoryError> {
    let result = sqlx::query(
        "UPDATE period_amendments
         SET new_income = ?, new_expenses = ?,
             income_difference = ?, expenses_difference = ?, submitted_at = ?
         WHERE id = ? AND submitted_at IS NULL",
    )
    .bind(decimal_to_text(finalization.new_income))
    .bind(decimal_to_text(finalization.new_expenses))
    .bind(decimal_to_text(finalization.income_difference))
    .bind(decimal_to_text(finalization.expenses_difference))
    .bind(finalization.submitted_at)
    .bind(finalization.amendment_id)
    .execute(&mut *conn)
    .await
    .map_err(database)?;

    if result.rows_affected() == 1 {
        return Ok(());
    }

    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM period_amendments WHERE id = ?")
        .bind(finalization.amendment_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(database)?;

    match exists {
        None => Err(RepositoryError::NotFound),
        Some(id) => Err(RepositoryError::Conflict(format!(
            "amendment {id} is already finalised"
        ))),
    }
}

#[async_trait]
impl MtdRepository for SqliteRepository {
    async fn get_tax_year_rates(
        &self,
        tax_year: i32,
    ) -> Result<TaxYearRates, RepositoryError> {
        let row = sqlx::query(
            "SELECT tax_year, personal_allowance, taper_threshold, basic_rate_limit,
                    higher_rate_limit, basic_rate, higher_rate, additional_rate,
                    nic_lower_profits_limit, nic_upper_profits_limit,
                    nic_main_rate, nic_additional_rate
             FROM tax_year_rates WHERE tax_year = ?",
        )
        .bind(tax_year)
        .fetch_optional(&self.pool)
        .await
        .map_err(database)?
        .ok_or(RepositoryError::NotFound)?;

        row_to_rates(&row)
    }

    async fn list_tax_years(&self) -> Result<Vec<i32>, RepositoryError> {
        sqlx::query_scalar::<_, i32>("SELECT tax_year FROM tax_year_rates ORDER BY tax_year")
            .fetch_all(&self.pool)
            .await
            .map_err(database)
    }

    async fn create_tax_period(
        &self,
        period: NewTaxPeriod,
    ) -> Result<TaxPeriod, RepositoryError> {
        let now = Utc::now();

        let result = sqlx::query(
            "INSERT INTO tax_periods (
                owner_id, tax_year, quarter_number, period_key,
                start_date, end_date, deadline_date, status,
                total_income, total_expenses, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 'draft', '0', '0', ?, ?)",
        )
        .bind(&period.owner_id)
        .bind(period.tax_year)
        .bind(i64::from(period.quarter_number))
        .bind(&period.period_key)
        .bind(period.start_date)
        .bind(period.end_date)
        .bind(period.deadline_date)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match database(e) {
            RepositoryError::Conflict(_) => RepositoryError::Conflict(format!(
                "period {} already exists for owner {}",
                period.period_key, period.owner_id
            )),
            other => other,
        })?;

        self.get_tax_period(&period.owner_id, result.last_insert_rowid())
            .await
    }

    async fn get_tax_period(
        &self,
        owner_id: &str,
        period_id: i64,
    ) -> Result<TaxPeriod, RepositoryError> {
        let row = sqlx::query(&format!("{PERIOD_SELECT} WHERE id = ? AND owner_id = ?"))
            .bind(period_id)
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(database)?
            .ok_or(RepositoryError::NotFound)?;

        row_to_tax_period(&row)
    }

    async fn list_tax_periods(
        &self,
        owner_id: &str,
        tax_year: i32,
    ) -> Result<Vec<TaxPeriod>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{PERIOD_SELECT} WHERE owner_id = ? AND tax_year = ? ORDER BY quarter_number"
        ))
        .bind(owner_id)
        .bind(tax_year)
        .fetch_all(&self.pool)
        .await
        .map_err(database)?;

        rows.iter().map(row_to_tax_period).collect()
    }

    async fn update_period_totals(
        &self,
        owner_id: &str,
        period_id: i64,
        total_income: Decimal,
        total_expenses: Decimal,
    ) -> Result<TaxPeriod, RepositoryError> {
        let result = sqlx::query(
            "UPDATE tax_periods SET total_income = ?, total_expenses = ?, updated_at = ?
             WHERE id = ? AND owner_id = ? AND status = 'draft'",
        )
        .bind(decimal_to_text(total_income))
        .bind(decimal_to_text(total_expenses))
        .bind(Utc::now())
        .bind(period_id)
        .bind(owner_id)
        .execute(&self.pool)
        .await
        .map_err(database)?;

        if result.rows_affected() == 0 {
            let current: Option<String> =
                sqlx::query_scalar("SELECT status FROM tax_periods WHERE id = ? AND owner_id = ?")
                    .bind(period_id)
                    .bind(owner_id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(database)?;
            return Err(match current {
                None => RepositoryError::NotFound,
                Some(status) => RepositoryError::Conflict(format!(
                    "period {period_id} is {status}, totals are fixed"
                )),
            });
        }

        self.get_tax_period(owner_id, period_id).await
    }

    async fn transition_period(
        &self,
        change: &StatusChange,
    ) -> Result<(), RepositoryError> {
        let mut conn = self.connection().await?;
        apply_status_change(&mut conn, change).await
    }

    async fn create_amendment(
        &self,
        amendment: NewPeriodAmendment,
    ) -> Result<PeriodAmendment, RepositoryError> {
        let mut conn = self.connection().await?;
        insert_amendment(&mut conn, amendment).await
    }

    async fn latest_amendment(
        &self,
        period_id: i64,
    ) -> Result<Option<PeriodAmendment>, RepositoryError> {
        let row = sqlx::query(&format!(
            "{AMENDMENT_SELECT} WHERE tax_period_id = ?
             ORDER BY created_at DESC, id DESC LIMIT 1"
        ))
        .bind(period_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(database)?;

        row.as_ref().map(row_to_amendment).transpose()
    }

    async fn list_amendments(
        &self,
        period_id: i64,
    ) -> Result<Vec<PeriodAmendment>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{AMENDMENT_SELECT} WHERE tax_period_id = ? ORDER BY created_at DESC, id DESC"
        ))
        .bind(period_id)
        .fetch_all(&self.pool)
        .await
        .map_err(database)?;

        rows.iter().map(row_to_amendment).collect()
    }

    async fn finalize_amendment(
        &self,
        finalization: &AmendmentFinalization,
    ) -> Result<(), RepositoryError> {
        let mut conn = self.connection().await?;
        apply_finalization(&mut conn, finalization).await
    }

    /// Status change and amendment insert commit together or not at all.
    async fn reopen_period(
        &self,
        change: &StatusChange,
        amendment: NewPeriodAmendment,
    ) -> Result<PeriodAmendment, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(database)?;
        apply_status_change(&mut tx, change).await?;
        let created = insert_amendment(&mut tx, amendment).await?;
        tx.commit().await.map_err(database)?;

        info!(
            period_id = change.period_id,
            amendment_id = created.id,
            "Reopened period in one transaction"
        );
        Ok(created)
    }

    async fn resubmit_period(
        &self,
        change: &StatusChange,
        finalization: &AmendmentFinalization,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(database)?;
        apply_status_change(&mut tx, change).await?;
        apply_finalization(&mut tx, finalization).await?;
        tx.commit().await.map_err(database)?;
        Ok(())
    }

    async fn create_income(
        &self,
        income: NewIncomeTransaction,
    ) -> Result<IncomeTransaction, RepositoryError> {
        let mut conn = self.connection().await?;
        insert_income(&mut conn, income).await
    }

    async fn create_incomes(
        &self,
        incomes: Vec<NewIncomeTransaction>,
    ) -> Result<Vec<IncomeTransaction>, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(database)?;
        let mut created = Vec::with_capacity(incomes.len());
        for income in incomes {
            created.push(insert_income(&mut tx, income).await?);
        }
        tx.commit().await.map_err(database)?;
        Ok(created)
    }

    async fn create_expense(
        &self,
        expense: NewExpenseTransaction,
    ) -> Result<ExpenseTransaction, RepositoryError> {
        let mut conn = self.connection().await?;
        insert_expense(&mut conn, expense).await
    }

    async fn create_expenses(
        &self,
        expenses: Vec<NewExpenseTransaction>,
    ) -> Result<Vec<ExpenseTransaction>, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(database)?;
        let mut created = Vec::with_capacity(expenses.len());
        for expense in expenses {
            created.push(insert_expense(&mut tx, expense).await?);
        }
        tx.commit().await.map_err(database)?;
        Ok(created)
    }

    async fn income_between(
        &self,
        owner_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<IncomeTransaction>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, owner_id, transaction_date, amount, vat_rate, description
             FROM income_transactions
             WHERE owner_id = ? AND transaction_date BETWEEN ? AND ?
             ORDER BY transaction_date, id",
        )
        .bind(owner_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(database)?;

        rows.iter().map(row_to_income).collect()
    }

    async fn expenses_between(
        &self,
        owner_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ExpenseTransaction>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, owner_id, transaction_date, amount, vat_rate, description,
                    disallowable_amount
             FROM expense_transactions
             WHERE owner_id = ? AND transaction_date BETWEEN ? AND ?
             ORDER BY transaction_date, id",
        )
        .bind(owner_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(database)?;

        rows.iter().map(row_to_expense).collect()
    }

    async fn get_business_profile(
        &self,
        owner_id: &str,
    ) -> Result<Option<BusinessProfile>, RepositoryError> {
        let row = sqlx::query(
            "SELECT owner_id, business_name, vat_number, hmrc_connected
             FROM business_profiles WHERE owner_id = ?",
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(database)?;

        row.as_ref().map(row_to_profile).transpose()
    }

    async fn upsert_business_profile(
        &self,
        profile: &BusinessProfile,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO business_profiles (owner_id, business_name, vat_number, hmrc_connected)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (owner_id) DO UPDATE SET
                business_name = excluded.business_name,
                vat_number = excluded.vat_number,
                hmrc_connected = excluded.hmrc_connected",
        )
        .bind(&profile.owner_id)
        .bind(&profile.business_name)
        .bind(&profile.vat_number)
        .bind(profile.hmrc_connected)
        .execute(&self.pool)
        .await
        .map_err(database)?;

        Ok(())
    }

    async fn create_adjustment(
        &self,
        adjustment: NewTaxAdjustment,
    ) -> Result<TaxAdjustment, RepositoryError> {
        let mut conn = self.connection().await?;
        insert_adjustment(&mut conn, adjustment).await
    }

    async fn create_adjustments(
        &self,
        adjustments: Vec<NewTaxAdjustment>,
    ) -> Result<Vec<TaxAdjustment>, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(database)?;
        let mut created = Vec::with_capacity(adjustments.len());
        for adjustment in adjustments {
            created.push(insert_adjustment(&mut tx, adjustment).await?);
        }
        tx.commit().await.map_err(database)?;
        Ok(created)
    }

    async fn list_adjustments(
        &self,
        owner_id: &str,
        tax_year: i32,
    ) -> Result<Vec<TaxAdjustment>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, owner_id, tax_year, description, amount, is_addition
             FROM tax_adjustments WHERE owner_id = ? AND tax_year = ? ORDER BY id",
        )
        .bind(owner_id)
        .bind(tax_year)
        .fetch_all(&self.pool)
        .await
        .map_err(database)?;

        rows.iter().map(row_to_adjustment).collect()
    }

    async fn get_eops_submission(
        &self,
        owner_id: &str,
        tax_year: i32,
    ) -> Result<Option<EopsSubmission>, RepositoryError> {
        let row = sqlx::query(&format!("{EOPS_SELECT} WHERE owner_id = ? AND tax_year = ?"))
            .bind(owner_id)
            .bind(tax_year)
            .fetch_optional(&self.pool)
            .await
            .map_err(database)?;

        row.as_ref().map(row_to_eops).transpose()
    }

    async fn upsert_eops_submission(
        &self,
        submission: UpsertEopsSubmission,
    ) -> Result<EopsSubmission, RepositoryError> {
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO eops_submissions (
                owner_id, tax_year, status, total_income, total_expenses, total_adjustments,
                net_profit, taxable_profit, tax_due,
                accounts_finalised, all_income_declared, all_expenses_claimed,
                adjustments_reviewed, submitted_at, hmrc_submission_id, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (owner_id, tax_year) DO UPDATE SET
                status = excluded.status,
                total_income = excluded.total_income,
                total_expenses = excluded.total_expenses,
                total_adjustments = excluded.total_adjustments,
                net_profit = excluded.net_profit,
                taxable_profit = excluded.taxable_profit,
                tax_due = excluded.tax_due,
                accounts_finalised = excluded.accounts_finalised,
                all_income_declared = excluded.all_income_declared,
                all_expenses_claimed = excluded.all_expenses_claimed,
                adjustments_reviewed = excluded.adjustments_reviewed,
                submitted_at = excluded.submitted_at,
                hmrc_submission_id = excluded.hmrc_submission_id,
                updated_at = excluded.updated_at",
        )
        .bind(&submission.owner_id)
        .bind(submission.tax_year)
        .bind(submission.status.as_str())
        .bind(decimal_to_text(submission.total_income))
        .bind(decimal_to_text(submission.total_expenses))
        .bind(decimal_to_text(submission.total_adjustments))
        .bind(decimal_to_text(submission.net_profit))
        .bind(decimal_to_text(submission.taxable_profit))
        .bind(decimal_to_text(submission.tax_due))
        .bind(submission.declarations.accounts_finalised)
        .bind(submission.declarations.all_income_declared)
        .bind(submission.declarations.all_expenses_claimed)
        .bind(submission.declarations.adjustments_reviewed)
        .bind(submission.submitted_at)
        .bind(&submission.hmrc_submission_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(database)?;

        self.get_eops_submission(&submission.owner_id, submission.tax_year)
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    async fn create_vat_submission(
        &self,
        submission: NewVatSubmission,
    ) -> Result<VatSubmission, RepositoryError> {
        let boxes = &submission.boxes;
        let result = sqlx::query(
            "INSERT INTO vat_submissions (
                owner_id, period_key, period_start, period_end,
                box1, box2, box3, box4, box5, box6, box7, box8, box9, submitted_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&submission.owner_id)
        .bind(&submission.period_key)
        .bind(submission.period_start)
        .bind(submission.period_end)
        .bind(decimal_to_text(boxes.box1))
        .bind(decimal_to_text(boxes.box2))
        .bind(decimal_to_text(boxes.box3))
        .bind(decimal_to_text(boxes.box4))
        .bind(decimal_to_text(boxes.box5))
        .bind(decimal_to_text(boxes.box6))
        .bind(decimal_to_text(boxes.box7))
        .bind(decimal_to_text(boxes.box8))
        .bind(decimal_to_text(boxes.box9))
        .bind(submission.submitted_at)
        .execute(&self.pool)
        .await
        .map_err(database)?;

        Ok(VatSubmission {
            id: result.last_insert_rowid(),
            owner_id: submission.owner_id,
            period_key: submission.period_key,
            period_start: submission.period_start,
            period_end: submission.period_end,
            boxes: submission.boxes,
            submitted_at: submission.submitted_at,
        })
    }

    async fn list_vat_submissions(
        &self,
        owner_id: &str,
    ) -> Result<Vec<VatSubmission>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{VAT_SELECT} WHERE owner_id = ? ORDER BY submitted_at DESC, id DESC"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(database)?;

        rows.iter().map(row_to_vat_submission).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use mtd_core::calculations::QuarterScheme;
    use mtd_core::lifecycle::PeriodStateMachine;
    use mtd_core::MtdError;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;
    use tokio::sync::Barrier;

    use super::*;

    const OWNER: &str = "owner-1";

    async fn setup_test_db() -> SqliteRepository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory database");

        let repo = SqliteRepository::new_with_pool(pool).await;
        repo.run_migrations()
            .await
            .expect("Failed to run migrations");
        repo.run_seeds(Path::new("./seeds"))
            .await
            .expect("Failed to run seeds");
        repo
    }

    /// A migrated, seeded database file shared by a pool of connections.
    async fn setup_file_db(dir: &TempDir) -> Arc<SqliteRepository> {
        let path = dir.path().join("mtd.db");
        let repo = SqliteRepository::new(&path.to_string_lossy())
            .await
            .expect("Failed to open database file");
        repo.run_migrations()
            .await
            .expect("Failed to run migrations");
        repo.run_seeds(Path::new("./seeds"))
            .await
            .expect("Failed to run seeds");
        Arc::new(repo)
    }

    fn date(
        y: i32,
        m: u32,
        d: u32,
    ) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn new_period(quarter: u8) -> NewTaxPeriod {
        NewTaxPeriod {
            owner_id: OWNER.to_string(),
            tax_year: 2024,
            quarter_number: quarter,
            period_key: format!("2024Q{quarter}"),
            start_date: date(2024, 4, 6),
            end_date: date(2024, 7, 5),
            deadline_date: date(2024, 8, 7),
        }
    }

    fn change(
        period_id: i64,
        from: PeriodStatus,
        to: PeriodStatus,
    ) -> StatusChange {
        StatusChange {
            owner_id: OWNER.to_string(),
            period_id,
            from,
            to,
            submitted_at: (to != PeriodStatus::Draft).then(Utc::now),
            changed_at: Utc::now(),
        }
    }

    fn new_amendment(
        period_id: i64,
        created_at: DateTime<Utc>,
    ) -> NewPeriodAmendment {
        NewPeriodAmendment {
            tax_period_id: period_id,
            amendment_type: AmendmentType::Correction,
            reason: "missed invoice".to_string(),
            previous_income: dec!(1000),
            previous_expenses: dec!(200),
            created_at,
        }
    }

    fn finalization(amendment_id: i64) -> AmendmentFinalization {
        AmendmentFinalization {
            amendment_id,
            new_income: dec!(1250.50),
            new_expenses: dec!(150),
            income_difference: dec!(250.50),
            expenses_difference: dec!(-50),
            submitted_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_get_tax_year_rates() {
        let repo = setup_test_db().await;

        let rates = repo
            .get_tax_year_rates(2024)
            .await
            .expect("Should find 2024 rates");

        assert_eq!(rates, TaxYearRates::uk_2024_25());
    }

    #[tokio::test]
    async fn test_get_tax_year_rates_not_found() {
        let repo = setup_test_db().await;

        let result = repo.get_tax_year_rates(1999).await;

        assert_eq!(result, Err(RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_list_tax_years() {
        let repo = setup_test_db().await;

        let years = repo.list_tax_years().await.expect("Should list years");

        assert_eq!(years, vec![2024, 2025]);
    }

    #[tokio::test]
    async fn test_create_and_get_tax_period() {
        let repo = setup_test_db().await;

        let created = repo
            .create_tax_period(new_period(1))
            .await
            .expect("Should create period");
        let fetched = repo
            .get_tax_period(OWNER, created.id)
            .await
            .expect("Should get period");

        assert_eq!(fetched, created);
        assert_eq!(fetched.status, PeriodStatus::Draft);
        assert_eq!(fetched.total_income, Decimal::ZERO);
        assert_eq!(fetched.deadline_date, date(2024, 8, 7));
        assert_eq!(fetched.submitted_at, None);
    }

    #[tokio::test]
    async fn test_create_duplicate_quarter_is_conflict() {
        let repo = setup_test_db().await;
        repo.create_tax_period(new_period(1)).await.unwrap();

        let result = repo.create_tax_period(new_period(1)).await;

        assert_eq!(
            result.err(),
            Some(RepositoryError::Conflict(
                "period 2024Q1 already exists for owner owner-1".to_string()
            ))
        );
    }

    #[tokio::test]
    async fn test_get_tax_period_of_another_owner_not_found() {
        let repo = setup_test_db().await;
        let created = repo.create_tax_period(new_period(1)).await.unwrap();

        let result = repo.get_tax_period("someone-else", created.id).await;

        assert_eq!(result, Err(RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_list_tax_periods_ordered_by_quarter() {
        let repo = setup_test_db().await;
        for quarter in [3, 1, 2] {
            repo.create_tax_period(new_period(quarter)).await.unwrap();
        }

        let quarters: Vec<u8> = repo
            .list_tax_periods(OWNER, 2024)
            .await
            .unwrap()
            .iter()
            .map(|p| p.quarter_number)
            .collect();

        assert_eq!(quarters, vec![1, 2, 3]);
        assert!(repo.list_tax_periods(OWNER, 2025).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_period_totals_keeps_scale() {
        let repo = setup_test_db().await;
        let created = repo.create_tax_period(new_period(1)).await.unwrap();

        let updated = repo
            .update_period_totals(OWNER, created.id, dec!(1250.50), dec!(99.99))
            .await
            .expect("Should update totals");

        assert_eq!(updated.total_income, dec!(1250.50));
        assert_eq!(updated.total_income.to_string(), "1250.50");
        assert_eq!(updated.total_expenses, dec!(99.99));
    }

    #[tokio::test]
    async fn test_update_period_totals_not_found() {
        let repo = setup_test_db().await;

        let result = repo
            .update_period_totals(OWNER, 999, dec!(1), dec!(1))
            .await;

        assert_eq!(result, Err(RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_update_period_totals_rejected_once_filed() {
        let repo = setup_test_db().await;
        let created = repo.create_tax_period(new_period(1)).await.unwrap();
        repo.update_period_totals(OWNER, created.id, dec!(1000), dec!(0))
            .await
            .unwrap();
        repo.transition_period(&change(created.id, PeriodStatus::Draft, PeriodStatus::Submitted))
            .await
            .unwrap();

        let result = repo
            .update_period_totals(OWNER, created.id, dec!(1250), dec!(0))
            .await;

        assert_eq!(
            result,
            Err(RepositoryError::Conflict(format!(
                "period {} is submitted, totals are fixed",
                created.id
            )))
        );
        let stored = repo.get_tax_period(OWNER, created.id).await.unwrap();
        assert_eq!(stored.total_income, dec!(1000));
    }

    #[tokio::test]
    async fn test_transition_period_is_compare_and_swap() {
        let repo = setup_test_db().await;
        let created = repo.create_tax_period(new_period(1)).await.unwrap();
        let submit = change(created.id, PeriodStatus::Draft, PeriodStatus::Submitted);

        repo.transition_period(&submit)
            .await
            .expect("First submit should apply");
        let second = repo.transition_period(&submit).await;
        let missing = repo
            .transition_period(&change(999, PeriodStatus::Draft, PeriodStatus::Submitted))
            .await;

        assert_eq!(
            second,
            Err(RepositoryError::Conflict(format!(
                "period {} is submitted, expected draft",
                created.id
            )))
        );
        assert_eq!(missing, Err(RepositoryError::NotFound));
        let stored = repo.get_tax_period(OWNER, created.id).await.unwrap();
        assert_eq!(stored.status, PeriodStatus::Submitted);
        assert!(stored.submitted_at.is_some());
    }

    #[tokio::test]
    async fn test_transition_without_timestamp_keeps_submitted_at() {
        let repo = setup_test_db().await;
        let created = repo.create_tax_period(new_period(1)).await.unwrap();
        repo.transition_period(&change(created.id, PeriodStatus::Draft, PeriodStatus::Submitted))
            .await
            .unwrap();
        let submitted_at = repo
            .get_tax_period(OWNER, created.id)
            .await
            .unwrap()
            .submitted_at;

        repo.transition_period(&change(created.id, PeriodStatus::Submitted, PeriodStatus::Draft))
            .await
            .unwrap();

        let reopened = repo.get_tax_period(OWNER, created.id).await.unwrap();
        assert_eq!(reopened.status, PeriodStatus::Draft);
        assert_eq!(reopened.submitted_at, submitted_at);
    }

    #[tokio::test]
    async fn test_latest_amendment_prefers_newest_creation_time() {
        let repo = setup_test_db().await;
        let period = repo.create_tax_period(new_period(1)).await.unwrap();
        let now = Utc::now();
        let newer = repo
            .create_amendment(new_amendment(period.id, now))
            .await
            .unwrap();
        let older = repo
            .create_amendment(new_amendment(period.id, now - Duration::hours(1)))
            .await
            .unwrap();

        let latest = repo.latest_amendment(period.id).await.unwrap();
        let ids: Vec<i64> = repo
            .list_amendments(period.id)
            .await
            .unwrap()
            .iter()
            .map(|a| a.id)
            .collect();

        assert_eq!(latest.map(|a| a.id), Some(newer.id));
        assert_eq!(ids, vec![newer.id, older.id]);
    }

    #[tokio::test]
    async fn test_new_amendment_starts_open_with_previous_figures() {
        let repo = setup_test_db().await;
        let period = repo.create_tax_period(new_period(1)).await.unwrap();

        let created = repo
            .create_amendment(new_amendment(period.id, Utc::now()))
            .await
            .unwrap();

        assert!(created.is_open());
        assert_eq!(created.new_income, dec!(1000));
        assert_eq!(created.new_expenses, dec!(200));
        assert_eq!(created.income_difference, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_amendment_for_unknown_period_not_found() {
        let repo = setup_test_db().await;

        let result = repo.create_amendment(new_amendment(999, Utc::now())).await;

        assert_eq!(result.err(), Some(RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_finalized_amendment_cannot_be_finalized_again() {
        let repo = setup_test_db().await;
        let period = repo.create_tax_period(new_period(1)).await.unwrap();
        let amendment = repo
            .create_amendment(new_amendment(period.id, Utc::now()))
            .await
            .unwrap();

        repo.finalize_amendment(&finalization(amendment.id))
            .await
            .expect("First finalisation should apply");
        let again = repo.finalize_amendment(&finalization(amendment.id)).await;
        let missing = repo.finalize_amendment(&finalization(999)).await;

        assert_eq!(
            again,
            Err(RepositoryError::Conflict(format!(
                "amendment {} is already finalised",
                amendment.id
            )))
        );
        assert_eq!(missing, Err(RepositoryError::NotFound));
        let stored = repo.latest_amendment(period.id).await.unwrap().unwrap();
        assert_eq!(stored.new_income, dec!(1250.50));
        assert_eq!(stored.income_difference, dec!(250.50));
        assert_eq!(stored.expenses_difference, dec!(-50));
        assert!(!stored.is_open());
    }

    #[tokio::test]
    async fn test_reopen_writes_nothing_when_status_check_fails() {
        let repo = setup_test_db().await;
        let period = repo.create_tax_period(new_period(1)).await.unwrap();

        // Still draft, so the reopen's compare-and-swap fails.
        let result = repo
            .reopen_period(
                &change(period.id, PeriodStatus::Submitted, PeriodStatus::Draft),
                new_amendment(period.id, Utc::now()),
            )
            .await;

        assert!(matches!(result, Err(RepositoryError::Conflict(_))));
        assert!(repo.list_amendments(period.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resubmit_rolls_back_finalization_on_conflict() {
        let repo = setup_test_db().await;
        let period = repo.create_tax_period(new_period(1)).await.unwrap();
        repo.transition_period(&change(period.id, PeriodStatus::Draft, PeriodStatus::Submitted))
            .await
            .unwrap();
        let amendment = repo
            .create_amendment(new_amendment(period.id, Utc::now()))
            .await
            .unwrap();

        let result = repo
            .resubmit_period(
                &change(period.id, PeriodStatus::Draft, PeriodStatus::Corrected),
                &finalization(amendment.id),
            )
            .await;

        assert!(matches!(result, Err(RepositoryError::Conflict(_))));
        let stored = repo.latest_amendment(period.id).await.unwrap().unwrap();
        assert!(stored.is_open());
    }

    #[tokio::test]
    async fn test_reopen_and_resubmit_commit_both_writes() {
        let repo = setup_test_db().await;
        let period = repo.create_tax_period(new_period(1)).await.unwrap();
        repo.transition_period(&change(period.id, PeriodStatus::Draft, PeriodStatus::Submitted))
            .await
            .unwrap();

        let amendment = repo
            .reopen_period(
                &change(period.id, PeriodStatus::Submitted, PeriodStatus::Draft),
                new_amendment(period.id, Utc::now()),
            )
            .await
            .expect("Reopen should commit");
        assert_eq!(
            repo.get_tax_period(OWNER, period.id).await.unwrap().status,
            PeriodStatus::Draft
        );

        repo.resubmit_period(
            &change(period.id, PeriodStatus::Draft, PeriodStatus::Corrected),
            &finalization(amendment.id),
        )
        .await
        .expect("Resubmit should commit");

        assert_eq!(
            repo.get_tax_period(OWNER, period.id).await.unwrap().status,
            PeriodStatus::Corrected
        );
        assert!(!repo.latest_amendment(period.id).await.unwrap().unwrap().is_open());
    }

    #[tokio::test]
    async fn test_transactions_filtered_by_inclusive_date_range() {
        let repo = setup_test_db().await;
        for (day, amount) in [(5, dec!(1)), (6, dec!(10)), (30, dec!(100)), (31, dec!(1000))] {
            repo.create_income(NewIncomeTransaction {
                owner_id: OWNER.to_string(),
                transaction_date: date(2024, 5, day),
                amount,
                vat_rate: dec!(20),
                description: None,
            })
            .await
            .unwrap();
        }
        repo.create_expense(NewExpenseTransaction {
            owner_id: OWNER.to_string(),
            transaction_date: date(2024, 5, 30),
            amount: dec!(120.00),
            vat_rate: dec!(20),
            description: Some("train fare".to_string()),
            disallowable_amount: Some(dec!(20.00)),
        })
        .await
        .unwrap();

        let income = repo
            .income_between(OWNER, date(2024, 5, 6), date(2024, 5, 30))
            .await
            .unwrap();
        let expenses = repo
            .expenses_between(OWNER, date(2024, 5, 6), date(2024, 5, 30))
            .await
            .unwrap();
        let other_owner = repo
            .income_between("someone-else", date(2024, 5, 1), date(2024, 5, 31))
            .await
            .unwrap();

        let amounts: Vec<Decimal> = income.iter().map(|t| t.amount).collect();
        assert_eq!(amounts, vec![dec!(10), dec!(100)]);
        assert_eq!(expenses.len(), 1);
        assert_eq!(expenses[0].allowable_amount(), dec!(100.00));
        assert_eq!(expenses[0].description.as_deref(), Some("train fare"));
        assert!(other_owner.is_empty());
    }

    fn income_on(
        day: u32,
        description: &str,
    ) -> NewIncomeTransaction {
        NewIncomeTransaction {
            owner_id: OWNER.to_string(),
            transaction_date: date(2024, 5, day),
            amount: dec!(100.00),
            vat_rate: dec!(20),
            description: Some(description.to_string()),
        }
    }

    #[tokio::test]
    async fn test_create_incomes_stores_whole_batch() {
        let repo = setup_test_db().await;

        let created = repo
            .create_incomes(vec![income_on(1, "first"), income_on(2, "second")])
            .await
            .expect("Batch should commit");

        let stored = repo
            .income_between(OWNER, date(2024, 5, 1), date(2024, 5, 31))
            .await
            .unwrap();
        assert_eq!(stored, created);
        assert!(created[0].id < created[1].id);
    }

    #[tokio::test]
    async fn test_failed_row_rolls_back_the_batch() {
        let repo = setup_test_db().await;
        sqlx::query(
            "CREATE TRIGGER reject_refund BEFORE INSERT ON income_transactions
             WHEN NEW.description = 'refund'
             BEGIN SELECT RAISE(ABORT, 'refunds are not income'); END",
        )
        .execute(&repo.pool)
        .await
        .unwrap();

        let result = repo
            .create_incomes(vec![
                income_on(1, "invoice 1"),
                income_on(2, "invoice 2"),
                income_on(3, "refund"),
            ])
            .await;

        assert!(matches!(
            result,
            Err(RepositoryError::Database(msg)) if msg.contains("refunds are not income")
        ));
        let stored = repo
            .income_between(OWNER, date(2024, 5, 1), date(2024, 5, 31))
            .await
            .unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn test_bulk_expenses_and_adjustments() {
        let repo = setup_test_db().await;

        let expenses = repo
            .create_expenses(vec![NewExpenseTransaction {
                owner_id: OWNER.to_string(),
                transaction_date: date(2024, 5, 30),
                amount: dec!(120.00),
                vat_rate: dec!(20),
                description: None,
                disallowable_amount: Some(dec!(20.00)),
            }])
            .await
            .unwrap();
        let adjustments = repo
            .create_adjustments(vec![NewTaxAdjustment {
                owner_id: OWNER.to_string(),
                tax_year: 2024,
                description: "private use".to_string(),
                amount: dec!(250),
                is_addition: true,
            }])
            .await
            .unwrap();

        assert_eq!(
            repo.expenses_between(OWNER, date(2024, 5, 1), date(2024, 5, 31))
                .await
                .unwrap(),
            expenses
        );
        assert_eq!(repo.list_adjustments(OWNER, 2024).await.unwrap(), adjustments);
    }

    #[tokio::test]
    async fn test_business_profile_upsert() {
        let repo = setup_test_db().await;
        assert_eq!(repo.get_business_profile(OWNER).await.unwrap(), None);

        let mut profile = BusinessProfile {
            owner_id: OWNER.to_string(),
            business_name: Some("Acme".to_string()),
            vat_number: None,
            hmrc_connected: false,
        };
        repo.upsert_business_profile(&profile).await.unwrap();
        profile.vat_number = Some("GB123456789".to_string());
        profile.hmrc_connected = true;
        repo.upsert_business_profile(&profile).await.unwrap();

        assert_eq!(repo.get_business_profile(OWNER).await.unwrap(), Some(profile));
    }

    #[tokio::test]
    async fn test_adjustments_listed_by_year() {
        let repo = setup_test_db().await;
        for (year, amount) in [(2024, dec!(500)), (2025, dec!(75)), (2024, dec!(1000))] {
            repo.create_adjustment(NewTaxAdjustment {
                owner_id: OWNER.to_string(),
                tax_year: year,
                description: "capital allowances".to_string(),
                amount,
                is_addition: false,
            })
            .await
            .unwrap();
        }

        let amounts: Vec<Decimal> = repo
            .list_adjustments(OWNER, 2024)
            .await
            .unwrap()
            .iter()
            .map(|a| a.amount)
            .collect();

        assert_eq!(amounts, vec![dec!(500), dec!(1000)]);
    }

    #[tokio::test]
    async fn test_eops_upsert_preserves_identity() {
        let repo = setup_test_db().await;
        let draft = UpsertEopsSubmission {
            owner_id: OWNER.to_string(),
            tax_year: 2024,
            status: EopsStatus::Draft,
            total_income: dec!(20000),
            total_expenses: dec!(5000),
            total_adjustments: dec!(-1000),
            net_profit: dec!(15000),
            taxable_profit: dec!(14000),
            tax_due: dec!(371.80),
            declarations: EopsDeclarations::default(),
            submitted_at: None,
            hmrc_submission_id: None,
        };

        let first = repo.upsert_eops_submission(draft.clone()).await.unwrap();
        let second = repo
            .upsert_eops_submission(UpsertEopsSubmission {
                status: EopsStatus::Submitted,
                declarations: EopsDeclarations::all(),
                submitted_at: Some(Utc::now()),
                ..draft
            })
            .await
            .unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.status, EopsStatus::Submitted);
        assert_eq!(second.tax_due, dec!(371.80));
        assert!(second.declarations.is_complete());
        assert_eq!(
            repo.get_eops_submission(OWNER, 2024).await.unwrap(),
            Some(second)
        );
    }

    #[tokio::test]
    async fn test_vat_submissions_newest_first() {
        let repo = setup_test_db().await;
        let now = Utc::now();
        let mut ids = Vec::new();
        for (key, submitted_at) in [("2024Q1", now - Duration::days(90)), ("2024Q2", now)] {
            let saved = repo
                .create_vat_submission(NewVatSubmission {
                    owner_id: OWNER.to_string(),
                    period_key: key.to_string(),
                    period_start: date(2024, 4, 6),
                    period_end: date(2024, 7, 5),
                    boxes: VatBoxes {
                        box1: dec!(200.00),
                        box3: dec!(200.00),
                        box4: dec!(40.00),
                        box5: dec!(160.00),
                        box6: dec!(1000.00),
                        box7: dec!(200.00),
                        ..VatBoxes::default()
                    },
                    submitted_at,
                })
                .await
                .unwrap();
            ids.push(saved.id);
        }

        let history = repo.list_vat_submissions(OWNER).await.unwrap();

        assert_eq!(history.iter().map(|s| s.id).collect::<Vec<_>>(), vec![ids[1], ids[0]]);
        assert_eq!(history[0].boxes.box5, dec!(160.00));
        assert_eq!(history[0].period_key, "2024Q2");
    }

    #[tokio::test]
    async fn test_state_machine_over_sqlite() {
        let repo = setup_test_db().await;
        let machine = PeriodStateMachine::new(&repo, Some(OWNER)).unwrap();
        let periods = machine
            .initialize_quarters(2024, QuarterScheme::TaxYear)
            .await
            .unwrap();
        let q1 = &periods[0];

        machine.submit(q1.id).await.unwrap();
        machine
            .reopen_for_amendment(q1.id, "missed invoice")
            .await
            .unwrap();
        machine.submit_amended_period(q1.id).await.unwrap();

        let result = machine.submit_amended_period(q1.id).await;

        assert!(matches!(result, Err(MtdError::InvalidTransition { .. })));
        assert_eq!(
            machine.period(q1.id).await.unwrap().status,
            PeriodStatus::Corrected
        );
        assert_eq!(repo.list_amendments(q1.id).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_reopens_on_file_db_create_one_amendment() {
        let dir = TempDir::new().expect("temp dir");
        let repo = setup_file_db(&dir).await;
        let machine = PeriodStateMachine::new(repo.as_ref(), Some(OWNER)).unwrap();
        let q1 = machine
            .initialize_quarters(2024, QuarterScheme::TaxYear)
            .await
            .unwrap()
            .remove(0);
        machine.submit(q1.id).await.unwrap();

        let start = Arc::new(Barrier::new(8));
        let mut handles = Vec::new();
        for i in 0..8 {
            let repo = Arc::clone(&repo);
            let start = Arc::clone(&start);
            handles.push(tokio::spawn(async move {
                let machine = PeriodStateMachine::new(repo.as_ref(), Some(OWNER))?;
                start.wait().await;
                machine
                    .reopen_for_amendment(q1.id, &format!("attempt {i}"))
                    .await
                    .map(|_| ())
            }));
        }

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => successes += 1,
                Err(err) => assert!(
                    matches!(err, MtdError::InvalidTransition { .. }),
                    "unexpected error {err:?}"
                ),
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(repo.list_amendments(q1.id).await.unwrap().len(), 1);
        assert_eq!(
            machine.period(q1.id).await.unwrap().status,
            PeriodStatus::Draft
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_submits_on_file_db_file_once() {
        let dir = TempDir::new().expect("temp dir");
        let repo = setup_file_db(&dir).await;
        let machine = PeriodStateMachine::new(repo.as_ref(), Some(OWNER)).unwrap();
        let q1 = machine
            .initialize_quarters(2024, QuarterScheme::TaxYear)
            .await
            .unwrap()
            .remove(0);

        let start = Arc::new(Barrier::new(8));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = Arc::clone(&repo);
            let start = Arc::clone(&start);
            handles.push(tokio::spawn(async move {
                let machine = PeriodStateMachine::new(repo.as_ref(), Some(OWNER))?;
                start.wait().await;
                machine.submit(q1.id).await.map(|_| ())
            }));
        }

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => successes += 1,
                Err(err) => assert!(
                    matches!(
                        err,
                        MtdError::InvalidTransition {
                            from: PeriodStatus::Submitted,
                            ..
                        }
                    ),
                    "unexpected error {err:?}"
                ),
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(
            machine.period(q1.id).await.unwrap().status,
            PeriodStatus::Submitted
        );
        assert!(repo.list_amendments(q1.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_seeds_is_repeatable() {
        let repo = setup_test_db().await;

        repo.run_seeds(Path::new("./seeds"))
            .await
            .expect("Should run seeds a second time");

        assert_eq!(repo.list_tax_years().await.unwrap(), vec![2024, 2025]);
    }

    #[tokio::test]
    async fn test_run_seeds_nonexistent_directory() {
        let repo = setup_test_db().await;

        let result = repo.run_seeds(Path::new("./nonexistent")).await;

        let err = result.expect_err("Should fail for nonexistent directory");
        assert_eq!(
            err.to_string(),
            "Failed to read seeds directory './nonexistent'"
        );
    }
}
