//! Name → provider registry owned by the server's composition root.
//!
//! Backends are registered once at startup. A duplicate or nameless
//! registration is a wiring bug: it is returned as an error and startup
//! code is expected to abort on it rather than carry on with an
//! inconsistent registry.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::memory::{self, MemoryProvider};
use super::sqlite::{self, SqliteProvider};
use super::traits::Provider;
use crate::error::{Result, SessionError};

pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn Provider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
        }
    }

    /// Registry pre-populated with the `memory` and `sqlite` backends.
    pub fn with_builtin_providers() -> Result<Self> {
        let registry = Self::new();
        registry.register(memory::PROVIDER_NAME, Arc::new(MemoryProvider::new()))?;
        registry.register(sqlite::PROVIDER_NAME, Arc::new(SqliteProvider::new()))?;
        Ok(registry)
    }

    pub fn register(&self, name: &str, provider: Arc<dyn Provider>) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            tracing::error!("Refusing to register a session provider without a name");
            return Err(SessionError::InvalidProviderName);
        }

        let mut providers = self.providers.write();
        if providers.contains_key(name) {
            tracing::error!(provider = name, "Session provider registered twice");
            return Err(SessionError::DuplicateProvider(name.to_string()));
        }
        providers.insert(name.to_string(), provider);
        tracing::debug!(provider = name, "Registered session provider");
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.read().get(name.trim()).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.providers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.read().is_empty()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
