//! Controller driver registry.
//!
//! Provides a `ControllerRegistry` struct for registering and retrieving
//! controller factories. Constructed at startup and passed by value; there is
//! no global registry.

use crate::drivers::register_all_drivers;
use crate::error::{BridgeError, BridgeResult};
use gem_common::config::{ConfigError, ControllerSettings};
use gem_common::controller::{Controller, ControllerFactory};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Registry of available controller drivers.
pub struct ControllerRegistry {
    factories: HashMap<&'static str, ControllerFactory>,
}

impl ControllerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry holding every built-in driver.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        register_all_drivers(&mut registry);
        registry
    }

    /// Register a driver factory.
    ///
    /// # Panics
    /// Panics if a driver with the same name is already registered.
    pub fn register(&mut self, name: &'static str, factory: ControllerFactory) {
        if self.factories.contains_key(name) {
            panic!("Driver '{name}' is already registered");
        }
        self.factories.insert(name, factory);
    }

    pub fn get_factory(&self, name: &str) -> Option<ControllerFactory> {
        self.factories.get(name).copied()
    }

    /// Create the controller named by `settings.driver`.
    ///
    /// # Errors
    /// `BridgeError::Config` for unknown drivers, `BridgeError::CommRead`
    /// when the driver cannot open its link.
    pub fn create(&self, settings: &ControllerSettings) -> BridgeResult<Arc<dyn Controller>> {
        let factory = self.get_factory(&settings.driver).ok_or_else(|| {
            BridgeError::Config(ConfigError::ValidationError(format!(
                "unknown controller driver '{}' (available: {})",
                settings.driver,
                self.list_drivers().join(", ")
            )))
        })?;
        let controller = factory(settings).map_err(BridgeError::CommRead)?;
        info!(
            driver = controller.name(),
            family = %controller.family(),
            address = %settings.address,
            "Controller created"
        );
        Ok(controller)
    }

    /// All registered driver names, sorted.
    pub fn list_drivers(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for ControllerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
