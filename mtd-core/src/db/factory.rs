use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::debug;

use super::repository::{MtdRepository, RepositoryError};

/// Which storage backend to open, and where.
///
/// | backend  | connection_string                 |
/// |----------|-----------------------------------|
/// | `sqlite` | a file path such as `mtd.db`, or `:memory:` |
/// | `memory` | ignored                           |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub backend: String,
    /// Handed to the backend's factory untouched.
    pub connection_string: String,
}

impl DbConfig {
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            backend: "sqlite".to_string(),
            connection_string: path.into(),
        }
    }

    /// Process-local storage that disappears with the repository.
    pub fn memory() -> Self {
        Self {
            backend: "memory".to_string(),
            connection_string: String::new(),
        }
    }

    /// Backend name as factories register it: trimmed and lowercase.
    pub fn backend_key(&self) -> String {
        self.backend.trim().to_ascii_lowercase()
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::sqlite(":memory:")
    }
}

/// Opens repositories for one storage backend.
///
/// Backend crates export a unit struct implementing this trait, which the
/// binary registers with a [`RepositoryRegistry`].
#[async_trait]
pub trait RepositoryFactory: Send + Sync {
    /// Lowercase name selected by [`DbConfig::backend`].
    fn backend_name(&self) -> &'static str;

    /// Returns a repository with its schema and tax-year rates in place.
    async fn create(&self, config: &DbConfig) -> Result<Box<dyn MtdRepository>, RepositoryError>;
}

/// Backend factories by name.
#[derive(Default)]
pub struct RepositoryRegistry {
    factories: BTreeMap<&'static str, Box<dyn RepositoryFactory>>,
}

impl RepositoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a factory, replacing any earlier one with the same name.
    pub fn register(&mut self, factory: Box<dyn RepositoryFactory>) {
        self.factories.insert(factory.backend_name(), factory);
    }

    /// Registered backend names in alphabetical order.
    pub fn available_backends(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    /// Opens a repository with the factory named by `config.backend`.
    ///
    /// # Errors
    /// [`RepositoryError::Configuration`] when no factory has that name;
    /// otherwise whatever the factory reports.
    pub async fn create(
        &self,
        config: &DbConfig,
    ) -> Result<Box<dyn MtdRepository>, RepositoryError> {
        let key = config.backend_key();
        let Some(factory) = self.factories.get(key.as_str()) else {
            return Err(RepositoryError::Configuration(format!(
                "unknown backend '{}'; available: {}",
                config.backend,
                self.available_backends().join(", ")
            )));
        };

        debug!(backend = %key, "Opening repository");
        factory.create(config).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::db::memory::{InMemoryRepository, MemoryRepositoryFactory};

    /// Records the connection string of every `create` call.
    struct RecordingFactory {
        name: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl RepositoryFactory for RecordingFactory {
        fn backend_name(&self) -> &'static str {
            self.name
        }

        async fn create(
            &self,
            config: &DbConfig,
        ) -> Result<Box<dyn MtdRepository>, RepositoryError> {
            self.seen
                .lock()
                .unwrap()
                .push(config.connection_string.clone());
            Ok(Box::new(InMemoryRepository::new()))
        }
    }

    struct UnreachableFactory;

    #[async_trait]
    impl RepositoryFactory for UnreachableFactory {
        fn backend_name(&self) -> &'static str {
            "remote"
        }

        async fn create(
            &self,
            config: &DbConfig,
        ) -> Result<Box<dyn MtdRepository>, RepositoryError> {
            Err(RepositoryError::Connection(format!(
                "cannot reach {}",
                config.connection_string
            )))
        }
    }

    fn recording(name: &'static str) -> (Box<dyn RepositoryFactory>, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let factory = RecordingFactory {
            name,
            seen: Arc::clone(&seen),
        };
        (Box::new(factory), seen)
    }

    #[test]
    fn default_config_is_in_memory_sqlite() {
        assert_eq!(DbConfig::default(), DbConfig::sqlite(":memory:"));
        assert_eq!(DbConfig::memory().backend, "memory");
    }

    #[test]
    fn backend_key_is_normalised() {
        let config = DbConfig {
            backend: " SQLite ".to_string(),
            connection_string: "mtd.db".to_string(),
        };

        assert_eq!(config.backend_key(), "sqlite");
    }

    #[test]
    fn empty_registry_lists_nothing() {
        assert!(RepositoryRegistry::new().available_backends().is_empty());
    }

    #[test]
    fn backends_are_listed_alphabetically() {
        let mut registry = RepositoryRegistry::new();
        registry.register(recording("sqlite").0);
        registry.register(recording("memory").0);
        registry.register(recording("sqlite").0);

        assert_eq!(registry.available_backends(), vec!["memory", "sqlite"]);
    }

    #[tokio::test]
    async fn create_forwards_connection_string_to_matching_factory() {
        let mut registry = RepositoryRegistry::new();
        let (sqlite, sqlite_seen) = recording("sqlite");
        let (memory, memory_seen) = recording("memory");
        registry.register(sqlite);
        registry.register(memory);

        registry
            .create(&DbConfig::sqlite("books.db"))
            .await
            .unwrap();

        assert_eq!(*sqlite_seen.lock().unwrap(), vec!["books.db".to_string()]);
        assert!(memory_seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn backend_lookup_ignores_case() {
        let mut registry = RepositoryRegistry::new();
        let (sqlite, seen) = recording("sqlite");
        registry.register(sqlite);

        let config = DbConfig {
            backend: "SQLITE".to_string(),
            connection_string: ":memory:".to_string(),
        };
        registry.create(&config).await.unwrap();

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_backend_lists_the_alternatives() {
        let mut registry = RepositoryRegistry::new();
        registry.register(recording("memory").0);
        registry.register(recording("sqlite").0);

        let result = registry
            .create(&DbConfig {
                backend: "postgres".to_string(),
                connection_string: String::new(),
            })
            .await;

        assert_eq!(
            result.err(),
            Some(RepositoryError::Configuration(
                "unknown backend 'postgres'; available: memory, sqlite".to_string()
            ))
        );
    }

    #[tokio::test]
    async fn factory_errors_are_returned_unchanged() {
        let mut registry = RepositoryRegistry::new();
        registry.register(Box::new(UnreachableFactory));

        let config = DbConfig {
            backend: "remote".to_string(),
            connection_string: "db.example:5432".to_string(),
        };

        assert_eq!(
            registry.create(&config).await.err(),
            Some(RepositoryError::Connection(
                "cannot reach db.example:5432".to_string()
            ))
        );
    }

    #[tokio::test]
    async fn memory_backend_comes_with_seeded_rates() {
        let mut registry = RepositoryRegistry::new();
        registry.register(Box::new(MemoryRepositoryFactory));

        let repo = registry.create(&DbConfig::memory()).await.unwrap();

        assert_eq!(repo.list_tax_years().await.unwrap(), vec![2024, 2025]);
    }
}
