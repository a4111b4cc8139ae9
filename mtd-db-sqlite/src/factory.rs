use std::path::PathBuf;

use async_trait::async_trait;
use mtd_core::db::{DbConfig, MtdRepository, RepositoryError, RepositoryFactory};
use tracing::info;

use crate::repository::SqliteRepository;

/// Resolve the seeds directory at runtime so it works in both development and
/// packaged distribution.
///
/// Resolution order:
/// 1. **`MTD_DB_SQLITE_SEEDS_DIR`** if set.
/// 2. **`./seeds`** if the directory exists in the current working directory.
/// 3. **`$CARGO_MANIFEST_DIR/seeds`** when run from the build tree.
fn seeds_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("MTD_DB_SQLITE_SEEDS_DIR") {
        return PathBuf::from(dir);
    }
    let cwd_seeds = PathBuf::from("./seeds");
    if cwd_seeds.is_dir() {
        return cwd_seeds;
    }
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("seeds")
}

/// [`RepositoryFactory`] for SQLite.
///
/// ```rust,no_run
/// use mtd_core::db::RepositoryRegistry;
/// use mtd_db_sqlite::SqliteRepositoryFactory;
///
/// let mut registry = RepositoryRegistry::new();
/// registry.register(Box::new(SqliteRepositoryFactory));
/// ```
pub struct SqliteRepositoryFactory;

#[async_trait]
impl RepositoryFactory for SqliteRepositoryFactory {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    /// Open the database described by `config.connection_string`.
    ///
    /// Accepts a bare file path (`"mtd.db"`, created if missing), a sqlx URL
    /// (`"sqlite:mtd.db"`) or `":memory:"`. Migrations run on every open and
    /// seed files are applied afterwards; both are idempotent.
    async fn create(
        &self,
        config: &DbConfig,
    ) -> Result<Box<dyn MtdRepository>, RepositoryError> {
        let repo = SqliteRepository::new(&config.connection_string)
            .await
            .map_err(|e| RepositoryError::Connection(format!("{e:#}")))?;
        repo.run_migrations()
            .await
            .map_err(|e| RepositoryError::Database(format!("{e:#}")))?;
        let seeds = seeds_dir();
        repo.run_seeds(&seeds)
            .await
            .map_err(|e| RepositoryError::Database(format!("{e:#}")))?;

        info!(
            database = %config.connection_string,
            seeds = %seeds.display(),
            "Opened SQLite repository"
        );
        Ok(Box::new(repo))
    }
}

#[cfg(test)]
mod tests {
    use mtd_core::db::{DbConfig, RepositoryFactory, RepositoryRegistry};
    use pretty_assertions::assert_eq;

    use super::SqliteRepositoryFactory;

    fn memory_config() -> DbConfig {
        DbConfig {
            backend: "sqlite".to_string(),
            connection_string: ":memory:".to_string(),
        }
    }

    #[test]
    fn backend_name_is_sqlite() {
        assert_eq!(SqliteRepositoryFactory.backend_name(), "sqlite");
    }

    #[tokio::test]
    async fn creates_seeded_in_memory_repository() {
        let result = SqliteRepositoryFactory.create(&memory_config()).await;

        let repo = match result {
            Ok(repo) => repo,
            Err(err) => panic!("failed to create in-memory repository: {err:#?}"),
        };
        assert_eq!(repo.list_tax_years().await, Ok(vec![2024, 2025]));
    }

    #[tokio::test]
    async fn registry_dispatches_to_sqlite() {
        let mut registry = RepositoryRegistry::new();
        registry.register(Box::new(SqliteRepositoryFactory));

        let repo = registry
            .create(&memory_config())
            .await
            .map_err(|e| e.to_string())
            .expect("registry should open sqlite");

        assert!(repo.get_tax_year_rates(2025).await.is_ok());
    }

    #[tokio::test]
    async fn unreachable_path_is_a_connection_error() {
        let config = DbConfig {
            backend: "sqlite".to_string(),
            connection_string: "/nonexistent-dir/for/mtd/test.db".to_string(),
        };

        let result = SqliteRepositoryFactory.create(&config).await;

        assert!(matches!(
            result.err(),
            Some(mtd_core::db::RepositoryError::Connection(_))
        ));
    }
}
