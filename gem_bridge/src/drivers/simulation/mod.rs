//! Simulation driver module.
//!
//! An in-memory controller with scripted reads and write journals, used by
//! the test suites and for running the bridge without a PLC.

mod driver;

pub use driver::SimulatedController;

use gem_common::config::ControllerSettings;
use gem_common::controller::{CommError, Controller};
use std::sync::Arc;

/// Factory function to create a simulation controller instance.
pub fn create_driver(settings: &ControllerSettings) -> Result<Arc<dyn Controller>, CommError> {
    Ok(Arc::new(SimulatedController::new(settings.family)))
}
