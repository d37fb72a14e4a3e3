//! Provider lookup by database type

use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::{DatabaseProvider, DatabaseType};
use crate::error::{AionError, Result};

/// Exactly one provider per database type
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<DatabaseType, Arc<dyn DatabaseProvider>>,
}

impl ProviderRegistry {
    /// Empty registry, for callers that register their own providers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every provider compiled into this build
    #[must_use]
    pub fn with_default_providers() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();

        #[cfg(feature = "postgres")]
        registry.register(Arc::new(crate::engine::postgres::PostgresProvider::new()));

        #[cfg(feature = "mysql")]
        registry.register(Arc::new(crate::engine::mysql::MySqlProvider::new()));

        #[cfg(feature = "sqlserver")]
        registry.register(Arc::new(crate::engine::sqlserver::SqlServerProvider::new()));

        #[cfg(feature = "document")]
        registry.register(Arc::new(crate::engine::document::DocumentProvider::new()));

        registry
    }

    /// Register a provider, replacing any previous one for the same type
    pub fn register(&mut self, provider: Arc<dyn DatabaseProvider>) {
        self.providers.insert(provider.database_type(), provider);
    }

    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn DatabaseProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, database_type: DatabaseType) -> Result<Arc<dyn DatabaseProvider>> {
        self.providers
            .get(&database_type)
            .cloned()
            .ok_or_else(|| AionError::unsupported_database(database_type.as_str()))
    }

    /// Registered types, in declaration order
    #[must_use]
    pub fn supported(&self) -> Vec<DatabaseType> {
        DatabaseType::ALL.into_iter().filter(|t| self.providers.contains_key(t)).collect()
    }
}
