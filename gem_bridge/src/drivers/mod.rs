//! Controller driver implementations.
//!
//! - [`simulation`] - In-memory controller for development and testing
//!
//! # Adding New Drivers
//!
//! 1. Create a new submodule under `drivers/`
//! 2. Implement the `Controller` trait from `gem_common::controller`
//! 3. Register the factory in [`register_all_drivers`]

pub mod simulation;

use crate::driver_registry::ControllerRegistry;

/// Register every built-in driver.
pub fn register_all_drivers(registry: &mut ControllerRegistry) {
    registry.register("simulation", simulation::create_driver);
}
