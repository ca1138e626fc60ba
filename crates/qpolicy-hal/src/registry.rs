//! Backend registry for resolving backend identifiers.
//!
//! The [`BackendRegistry`] maps identifiers such as `simulator` or
//! `fake-5q` to factories. Embedding applications register their own
//! factories next to the built-in ones.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::backend::{Backend, BackendConfig, BackendFactory};
use crate::error::{HalError, HalResult};

/// Factory function type for registered backends.
type Factory = Arc<dyn Fn(BackendConfig) -> HalResult<Arc<dyn Backend>> + Send + Sync>;

/// Central registry of backend factories.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    factories: FxHashMap<String, Factory>,
}

impl BackendRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend type under `name`.
    pub fn register<B>(&mut self, name: impl Into<String>)
    where
        B: BackendFactory + 'static,
    {
        let name = name.into();
        debug!("Registering backend: {}", name);
        self.factories.insert(
            name,
            Arc::new(|config| {
                let backend = B::from_config(config)?;
                Ok(Arc::new(backend) as Arc<dyn Backend>)
            }),
        );
    }

    /// Register a backend factory with a custom constructor.
    pub fn register_factory(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(BackendConfig) -> HalResult<Arc<dyn Backend>> + Send + Sync + 'static,
    ) {
        let name = name.into();
        debug!("Registering factory backend: {}", name);
        self.factories.insert(name, Arc::new(factory));
    }

    /// Create a backend by name.
    ///
    /// The config name is set to `name` when left empty.
    pub fn create(&self, name: &str, mut config: BackendConfig) -> HalResult<Arc<dyn Backend>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            HalError::BackendUnavailable(format!(
                "No backend registered with name '{name}' (available: {})",
                self.available_backends().join(", ")
            ))
        })?;
        if config.name.is_empty() {
            config.name = name.to_string();
        }
        factory(config)
    }

    /// List all registered backend names, sorted.
    pub fn available_backends(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a backend is registered under `name`.
    pub fn has_backend(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.available_backends())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_registry() {
        let registry = BackendRegistry::new();
        assert!(registry.available_backends().is_empty());
        assert!(!registry.has_backend("simulator"));
    }

    #[test]
    fn test_register_factory() {
        let mut registry = BackendRegistry::new();
        registry.register_factory("test", |_config| {
            Err(HalError::BackendUnavailable("test only".into()))
        });

        assert!(registry.has_backend("test"));
        assert_eq!(registry.available_backends(), vec!["test"]);
    }

    #[test]
    fn test_create_unknown_backend() {
        let mut registry = BackendRegistry::new();
        registry.register_factory("known", |_| Err(HalError::Backend("unused".into())));

        let err = registry
            .create("nonexistent", BackendConfig::new("nonexistent"))
            .err()
            .unwrap();
        assert!(matches!(err, HalError::BackendUnavailable(ref msg) if msg.contains("known")));
    }

    #[test]
    fn test_available_backends_sorted() {
        let mut registry = BackendRegistry::new();
        registry.register_factory("zebra", |_| {
            Err(HalError::BackendUnavailable("test".into()))
        });
        registry.register_factory("alpha", |_| {
            Err(HalError::BackendUnavailable("test".into()))
        });

        assert_eq!(registry.available_backends(), vec!["alpha", "zebra"]);
    }
}
