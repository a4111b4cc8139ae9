use std::io::Read;

use chrono::NaiveDate;
use mtd_core::{
    MtdError, MtdRepository, NewExpenseTransaction, NewIncomeTransaction, NewTaxAdjustment,
    RepositoryError,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::info;

/// Errors that can occur when importing transaction data.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("CSV parse error: {0}")]
    CsvParse(String),

    /// `row` counts data rows from 1, excluding the header.
    #[error("Invalid record on row {row}: {message}")]
    InvalidRecord { row: usize, message: String },

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl From<csv::Error> for LoaderError {
    fn from(err: csv::Error) -> Self {
        LoaderError::CsvParse(err.to_string())
    }
}

/// One row of an income CSV.
///
/// Columns: `date` (YYYY-MM-DD), `amount` (VAT-inclusive), `vat_rate`
/// (percentage, empty for 0), `description` (optional).
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct IncomeRecord {
    pub date: NaiveDate,
    pub amount: Decimal,
    #[serde(default, deserialize_with = "deserialize_optional_decimal")]
    pub vat_rate: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub description: Option<String>,
}

/// One row of an expense CSV: the income columns plus an optional
/// `disallowable_amount`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ExpenseRecord {
    pub date: NaiveDate,
    pub amount: Decimal,
    #[serde(default, deserialize_with = "deserialize_optional_decimal")]
    pub vat_rate: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_decimal")]
    pub disallowable_amount: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AdjustmentKind {
    Addition,
    Deduction,
}

/// One row of a year-end adjustments CSV.
///
/// Columns: `tax_year`, `description`, `amount` (positive), `kind`
/// (`addition` or `deduction`).
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AdjustmentRecord {
    pub tax_year: i32,
    pub description: String,
    pub amount: Decimal,
    pub kind: AdjustmentKind,
}

fn deserialize_optional_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: Option<String> = Option::deserialize(deserializer)?;
    match s {
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => s
            .trim()
            .parse::<Decimal>()
            .map(Some)
            .map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

fn deserialize_optional_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: Option<String> = Option::deserialize(deserializer)?;
    Ok(s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()))
}

fn parse_records<T: DeserializeOwned, R: Read>(reader: R) -> Result<Vec<T>, LoaderError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut records = Vec::new();

    for result in csv_reader.deserialize() {
        let record: T = result?;
        records.push(record);
    }

    Ok(records)
}

/// Converts every record, failing on the first invalid one so that nothing
/// is written for a bad file.
fn validate_all<T, N>(
    records: &[T],
    convert: impl Fn(&T) -> N,
    validate: impl Fn(&N) -> Result<(), MtdError>,
) -> Result<Vec<N>, LoaderError> {
    records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            let new = convert(record);
            validate(&new)
                .map(|()| new)
                .map_err(|err| LoaderError::InvalidRecord {
                    row: index + 1,
                    message: match err {
                        MtdError::Validation(message) => message,
                        other => other.to_string(),
                    },
                })
        })
        .collect()
}

/// Imports income, expense and adjustment rows for one owner.
///
/// Parsing and loading are separate steps. Loading validates the whole batch
/// before the first insert, so a file with one bad row imports nothing, and
/// then hands the batch to the repository's bulk insert, which stores every
/// row or none on backends with transactions.
pub struct TransactionLoader;

impl TransactionLoader {
    pub fn parse_income<R: Read>(reader: R) -> Result<Vec<IncomeRecord>, LoaderError> {
        parse_records(reader)
    }

    pub fn parse_expenses<R: Read>(reader: R) -> Result<Vec<ExpenseRecord>, LoaderError> {
        parse_records(reader)
    }

    pub fn parse_adjustments<R: Read>(reader: R) -> Result<Vec<AdjustmentRecord>, LoaderError> {
        parse_records(reader)
    }

    pub async fn load_income<R: MtdRepository + ?Sized>(
        repo: &R,
        owner_id: &str,
        records: &[IncomeRecord],
    ) -> Result<usize, LoaderError> {
        let batch = validate_all(
            records,
            |r| NewIncomeTransaction {
                owner_id: owner_id.to_string(),
                transaction_date: r.date,
                amount: r.amount,
                vat_rate: r.vat_rate.unwrap_or(Decimal::ZERO),
                description: r.description.clone(),
            },
            NewIncomeTransaction::validate,
        )?;

        let count = repo.create_incomes(batch).await?.len();
        info!(owner_id, count, "Imported income transactions");
        Ok(count)
    }

    pub async fn load_expenses<R: MtdRepository + ?Sized>(
        repo: &R,
        owner_id: &str,
        records: &[ExpenseRecord],
    ) -> Result<usize, LoaderError> {
        let batch = validate_all(
            records,
            |r| NewExpenseTransaction {
                owner_id: owner_id.to_string(),
                transaction_date: r.date,
                amount: r.amount,
                vat_rate: r.vat_rate.unwrap_or(Decimal::ZERO),
                description: r.description.clone(),
                disallowable_amount: r.disallowable_amount,
            },
            NewExpenseTransaction::validate,
        )?;

        let count = repo.create_expenses(batch).await?.len();
        info!(owner_id, count, "Imported expense transactions");
        Ok(count)
    }

    pub async fn load_adjustments<R: MtdRepository + ?Sized>(
        repo: &R,
        owner_id: &str,
        records: &[AdjustmentRecord],
    ) -> Result<usize, LoaderError> {
        let batch = validate_all(
            records,
            |r| NewTaxAdjustment {
                owner_id: owner_id.to_string(),
                tax_year: r.tax_year,
                description: r.description.clone(),
                amount: r.amount,
                is_addition: r.kind == AdjustmentKind::Addition,
            },
            NewTaxAdjustment::validate,
        )?;

        let count = repo.create_adjustments(batch).await?.len();
        info!(owner_id, count, "Imported tax adjustments");
        Ok(count)
    }
}
