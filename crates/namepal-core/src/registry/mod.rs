//! Plugin-based component registry
//!
//! The registry allows DNS backends and workload sources to be registered
//! dynamically at startup, avoiding hardcoded if-else chains. Each daemon
//! selects exactly one backend or source from its configuration and never
//! switches at runtime.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use namepal_core::ComponentRegistry;
//!
//! let registry = ComponentRegistry::new();
//! namepal_backend_pihole::register(&registry);
//!
//! let backend = registry.create_backend(&config.backend)?;
//! ```
//!
//! ## Registration
//!
//! Implementations register themselves through a `register()` function:
//!
//! ```rust,ignore
//! // In namepal-backend-pihole
//! pub fn register(registry: &ComponentRegistry) {
//!     registry.register_backend("pihole", Box::new(PiholeFactory));
//! }
//! ```

use crate::config::{BackendConfig, SourceConfig};
use crate::error::{Error, Result};
use crate::traits::{DnsBackend, DnsBackendFactory, WorkloadSource, WorkloadSourceFactory};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Component registry for plugin-based backend and source creation
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct ComponentRegistry {
    /// Registered DNS backend factories
    backends: RwLock<HashMap<String, Box<dyn DnsBackendFactory>>>,

    /// Registered workload source factories
    sources: RwLock<HashMap<String, Box<dyn WorkloadSourceFactory>>>,
}

impl ComponentRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a DNS backend factory under `name` (e.g. "pihole")
    pub fn register_backend(&self, name: impl Into<String>, factory: Box<dyn DnsBackendFactory>) {
        let mut backends = self.backends.write().unwrap_or_else(PoisonError::into_inner);
        backends.insert(name.into(), factory);
    }

    /// Register a workload source factory under `name` (e.g. "docker")
    pub fn register_source(&self, name: impl Into<String>, factory: Box<dyn WorkloadSourceFactory>) {
        let mut sources = self.sources.write().unwrap_or_else(PoisonError::into_inner);
        sources.insert(name.into(), factory);
    }

    /// Create a DNS backend from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn DnsBackend>)`: Created backend instance
    /// - `Err(Error::Config)`: If the type is not registered or creation fails
    pub fn create_backend(&self, config: &BackendConfig) -> Result<Box<dyn DnsBackend>> {
        let backend_type = config.type_name();
        let backends = self.backends.read().unwrap_or_else(PoisonError::into_inner);

        let factory = backends
            .get(backend_type)
            .ok_or_else(|| Error::config(format!("Unknown backend type: {}", backend_type)))?;

        factory.create(config)
    }

    /// Create a workload source from configuration
    pub fn create_source(&self, config: &SourceConfig) -> Result<Box<dyn WorkloadSource>> {
        let source_type = config.type_name();
        let sources = self.sources.read().unwrap_or_else(PoisonError::into_inner);

        let factory = sources
            .get(source_type)
            .ok_or_else(|| Error::config(format!("Unknown source type: {}", source_type)))?;

        factory.create(config)
    }

    /// List all registered backend types
    pub fn list_backends(&self) -> Vec<String> {
        let backends = self.backends.read().unwrap_or_else(PoisonError::into_inner);
        backends.keys().cloned().collect()
    }

    /// List all registered source types
    pub fn list_sources(&self) -> Vec<String> {
        let sources = self.sources.read().unwrap_or_else(PoisonError::into_inner);
        sources.keys().cloned().collect()
    }

    /// Check if a backend type is registered
    pub fn has_backend(&self, name: &str) -> bool {
        let backends = self.backends.read().unwrap_or_else(PoisonError::into_inner);
        backends.contains_key(name)
    }

    /// Check if a source type is registered
    pub fn has_source(&self, name: &str) -> bool {
        let sources = self.sources.read().unwrap_or_else(PoisonError::into_inner);
        sources.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockBackendFactory;

    impl DnsBackendFactory for MockBackendFactory {
        fn create(&self, _config: &BackendConfig) -> Result<Box<dyn DnsBackend>> {
            Err(Error::config("Mock backend not implemented"))
        }
    }

    #[test]
    fn test_registry_registration() {
        let registry = ComponentRegistry::new();

        assert!(!registry.has_backend("mock"));

        registry.register_backend("mock", Box::new(MockBackendFactory));

        assert!(registry.has_backend("mock"));
        assert!(registry.list_backends().contains(&"mock".to_string()));
        assert!(registry.list_sources().is_empty());
    }

    #[test]
    fn test_unknown_type_is_config_error() {
        let registry = ComponentRegistry::new();
        let config = BackendConfig::Pihole {
            url: "http://pi.hole/admin/api.php".to_string(),
            token: "token".to_string(),
            timeout_secs: 10,
        };
        assert!(matches!(registry.create_backend(&config), Err(Error::Config(_))));
        assert!(matches!(
            registry.create_source(&SourceConfig::default()),
            Err(Error::Config(_))
        ));
    }
}
