//! Money columns.
//!
//! Amounts and rates are written as TEXT so the scale survives
//! (`12.50` reads back as `12.50`). Reads also accept INTEGER and REAL
//! storage classes, which show up in rows edited by hand.

use std::str::FromStr;

use mtd_core::RepositoryError;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Decode, Row, Sqlite, Type, TypeInfo, ValueRef};

fn read<'r, T>(
    row: &'r SqliteRow,
    column: &str,
) -> Result<T, RepositoryError>
where
    T: Decode<'r, Sqlite> + Type<Sqlite>,
{
    row.try_get(column)
        .map_err(|e| RepositoryError::Database(format!("Failed to read '{column}': {e}")))
}

/// Reads a money column. NULL reads as zero.
pub fn get_decimal(
    row: &SqliteRow,
    column: &str,
) -> Result<Decimal, RepositoryError> {
    get_optional_decimal(row, column).map(Option::unwrap_or_default)
}

/// Reads a nullable money column.
pub fn get_optional_decimal(
    row: &SqliteRow,
    column: &str,
) -> Result<Option<Decimal>, RepositoryError> {
    let raw = row
        .try_get_raw(column)
        .map_err(|e| RepositoryError::Database(format!("Column '{column}' not found: {e}")))?;
    if raw.is_null() {
        return Ok(None);
    }

    let storage = raw.type_info().name().to_string();
    let value = match storage.as_str() {
        "TEXT" => parse_decimal(&read::<String>(row, column)?, column)?,
        "INTEGER" => Decimal::from(read::<i64>(row, column)?),
        "REAL" => {
            let real = read::<f64>(row, column)?;
            Decimal::try_from(real).map_err(|e| {
                RepositoryError::Database(format!(
                    "REAL {real} in column '{column}' is not a Decimal: {e}"
                ))
            })?
        }
        other => {
            return Err(RepositoryError::Database(format!(
                "Unexpected type '{other}' for column '{column}'"
            )));
        }
    };
    Ok(Some(value))
}

fn parse_decimal(
    text: &str,
    column: &str,
) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(text.trim()).map_err(|e| {
        RepositoryError::Database(format!(
            "Failed to parse '{text}' in column '{column}' as Decimal: {e}"
        ))
    })
}

pub fn decimal_to_text(d: Decimal) -> String {
    d.to_string()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;
    use sqlx::SqlitePool;
    use sqlx::sqlite::SqlitePoolOptions;

    use super::*;

    /// A one-row table holding `literal` in a column named `amount`.
    async fn row_with(literal: &str) -> SqliteRow {
        let pool: SqlitePool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory database");
        // No declared type, so each literal keeps its own storage class
        sqlx::query("CREATE TABLE money (id INTEGER PRIMARY KEY, amount)")
            .execute(&pool)
            .await
            .expect("create table");
        sqlx::query(&format!("INSERT INTO money (id, amount) VALUES (1, {literal})"))
            .execute(&pool)
            .await
            .expect("insert row");
        sqlx::query("SELECT id, amount FROM money")
            .fetch_one(&pool)
            .await
            .expect("fetch row")
    }

    #[tokio::test]
    async fn test_text_keeps_scale() {
        let row = row_with("'1250.50'").await;

        let amount = get_decimal(&row, "amount").unwrap();

        assert_eq!(amount, dec!(1250.50));
        assert_eq!(amount.scale(), 2);
    }

    #[tokio::test]
    async fn test_padded_negative_text() {
        let row = row_with("' -50.25 '").await;

        assert_eq!(get_decimal(&row, "amount"), Ok(dec!(-50.25)));
    }

    #[tokio::test]
    async fn test_integer_storage() {
        let row = row_with("12345").await;

        assert_eq!(get_decimal(&row, "amount"), Ok(dec!(12345)));
    }

    #[tokio::test]
    async fn test_real_storage() {
        let row = row_with("123.45").await;

        assert_eq!(get_decimal(&row, "amount"), Ok(dec!(123.45)));
    }

    #[tokio::test]
    async fn test_null_is_zero_or_none() {
        let row = row_with("NULL").await;

        assert_eq!(get_decimal(&row, "amount"), Ok(Decimal::ZERO));
        assert_eq!(get_optional_decimal(&row, "amount"), Ok(None));
    }

    #[tokio::test]
    async fn test_optional_text() {
        let row = row_with("'999.99'").await;

        assert_eq!(get_optional_decimal(&row, "amount"), Ok(Some(dec!(999.99))));
    }

    #[tokio::test]
    async fn test_missing_column() {
        let row = row_with("'1'").await;

        let result = get_decimal(&row, "disallowable_amount");

        assert!(matches!(
            result,
            Err(RepositoryError::Database(msg))
                if msg.starts_with("Column 'disallowable_amount' not found:")
        ));
    }

    #[tokio::test]
    async fn test_unparseable_text() {
        let row = row_with("'twelve pounds'").await;

        let result = get_decimal(&row, "amount");

        assert!(matches!(
            result,
            Err(RepositoryError::Database(msg))
                if msg.starts_with("Failed to parse 'twelve pounds' in column 'amount'")
        ));
    }

    #[tokio::test]
    async fn test_blob_is_rejected() {
        let row = row_with("X'0102'").await;

        assert_eq!(
            get_decimal(&row, "amount"),
            Err(RepositoryError::Database(
                "Unexpected type 'BLOB' for column 'amount'".to_string()
            ))
        );
    }

    #[test]
    fn test_text_form_keeps_trailing_zeros_and_sign() {
        assert_eq!(decimal_to_text(dec!(1250.50)), "1250.50");
        assert_eq!(decimal_to_text(dec!(-789.012)), "-789.012");
        assert_eq!(decimal_to_text(Decimal::ZERO), "0");
    }
}
