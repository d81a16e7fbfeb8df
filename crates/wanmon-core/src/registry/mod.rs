//! Plugin-based backend registry
//!
//! The registry allows device backends to be registered dynamically at
//! startup, avoiding hardcoded if-else chains in the daemon. Backend
//! selection is still static: the daemon registers the backends it was
//! built with, creates exactly one from the configuration, and never
//! re-selects at runtime.
//!
//! ## Registration
//!
//! Backend crates provide a `register()` function:
//!
//! ```rust,ignore
//! // In wanmon-backend-omada
//! pub fn register(registry: &BackendRegistry) {
//!     registry.register_backend("omada", Box::new(OmadaFactory));
//! }
//! ```

use std::collections::HashMap;
use std::sync::RwLock;

use crate::config::BackendConfig;
use crate::error::{Error, Result};
use crate::traits::{BackendFactory, DeviceBackend};

/// Registry of backend factories keyed by type name
///
/// ## Thread Safety
///
/// Uses interior mutability with RwLock, allowing concurrent reads and
/// exclusive writes.
#[derive(Default)]
pub struct BackendRegistry {
    factories: RwLock<HashMap<String, Box<dyn BackendFactory>>>,
}

impl BackendRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend factory
    ///
    /// The name must match [`BackendConfig::type_name`] for the config
    /// variant the factory understands ("omada", "ssh", "snmp").
    pub fn register_backend(&self, name: impl Into<String>, factory: Box<dyn BackendFactory>) {
        let mut factories = self.factories.write().unwrap();
        factories.insert(name.into(), factory);
    }

    /// Create a backend from configuration
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when no factory is registered for the configured
    /// backend type, or the factory rejects the configuration.
    pub fn create_backend(&self, config: &BackendConfig) -> Result<Box<dyn DeviceBackend>> {
        let factories = self.factories.read().unwrap();
        let factory = factories.get(config.type_name()).ok_or_else(|| {
            Error::config(format!(
                "no backend registered for type '{}' (registered: {})",
                config.type_name(),
                {
                    let mut names: Vec<_> = factories.keys().cloned().collect();
                    names.sort();
                    names.join(", ")
                }
            ))
        })?;
        factory.create(config)
    }

    /// Names of all registered backends
    pub fn registered_backends(&self) -> Vec<String> {
        let factories = self.factories.read().unwrap();
        let mut names: Vec<_> = factories.keys().cloned().collect();
        names.sort();
        names
    }
}
