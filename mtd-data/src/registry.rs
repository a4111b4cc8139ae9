use mtd_core::db::{MemoryRepositoryFactory, RepositoryRegistry};
use mtd_db_sqlite::SqliteRepositoryFactory;

/// Registry with every backend this workspace ships.
pub fn build_registry() -> RepositoryRegistry {
    let mut registry = RepositoryRegistry::new();
    registry.register(Box::new(SqliteRepositoryFactory));
    registry.register(Box::new(MemoryRepositoryFactory));
    registry
}
