//! Controller capability trait and error types.
//!
//! This module defines:
//! - `Controller` trait - read/write access to a PLC by address or tag
//! - `CommError` enum - error types for controller communication
//! - `ControllerFamily` - addressing scheme of a controller
//! - `ControllerFactory` type alias - factory function type

use crate::config::ControllerSettings;
use crate::value::{DataType, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Error types for controller communication.
#[derive(Debug, Clone, Error)]
pub enum CommError {
    /// Reading an address failed
    #[error("Read of '{address}' failed: {reason}")]
    Read { address: String, reason: String },

    /// Writing an address failed
    #[error("Write of '{address}' failed: {reason}")]
    Write { address: String, reason: String },

    /// The controller link is down
    #[error("Controller disconnected")]
    Disconnected,

    /// The driver cannot serve this request
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl CommError {
    pub fn read(address: &str, reason: impl Into<String>) -> Self {
        CommError::Read {
            address: address.to_string(),
            reason: reason.into(),
        }
    }

    pub fn write(address: &str, reason: impl Into<String>) -> Self {
        CommError::Write {
            address: address.to_string(),
            reason: reason.into(),
        }
    }
}

/// Addressing family of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ControllerFamily {
    /// Symbolic tag names (e.g. `Program:Main.Flag`).
    #[default]
    Tag,
    /// Numeric register offsets.
    Address,
}

impl fmt::Display for ControllerFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerFamily::Tag => f.write_str("tag"),
            ControllerFamily::Address => f.write_str("address"),
        }
    }
}

/// Factory function type for creating controller instances.
pub type ControllerFactory = fn(&ControllerSettings) -> Result<Arc<dyn Controller>, CommError>;

/// Trait defining the interface to a factory-floor controller.
///
/// The engine holds a single `Arc<dyn Controller>` shared by every worker,
/// so implementations must be safe under concurrent use.
///
/// # Contract
///
/// - `read` returns a value of the requested `data_type`
/// - `write` either stores the whole value or fails
/// - `is_connected` reflects the last known link state and never blocks
pub trait Controller: Send + Sync {
    /// Returns the driver's identifier (e.g. "simulation").
    fn name(&self) -> &'static str;

    fn family(&self) -> ControllerFamily;

    /// Read one address.
    ///
    /// # Errors
    /// `CommError::Read` on a failed transfer, `CommError::Disconnected` when
    /// the link is down.
    fn read(&self, address: &str, data_type: DataType) -> Result<Value, CommError>;

    /// Write one scalar to an address.
    fn write(&self, address: &str, data_type: DataType, value: &Value) -> Result<(), CommError>;

    fn is_connected(&self) -> bool;

    /// Re-establish the link. Drivers that reconnect on demand keep the default.
    fn connect(&self) -> Result<(), CommError> {
        Ok(())
    }
}
