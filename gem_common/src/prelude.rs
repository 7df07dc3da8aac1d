//! Prelude module for common re-exports.
//!
//! This module provides convenient re-exports of commonly used types
//! so that consumers can do `use gem_common::prelude::*;` and get
//! the most important types without listing individual paths.

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{BridgeConfig, ConfigError, ConfigLoader, LogLevel, SharedConfig};

// ─── Equipment Document ─────────────────────────────────────────────
pub use crate::equipment::{
    CallBackStep, CollectionEventDef, EquipmentDocument, OperationType, Premise, SignalDef,
    VariableDef, VariableKind, WriteValueSpec,
};

// ─── Values ─────────────────────────────────────────────────────────
pub use crate::value::{DataType, ReportValue, Value, ValueType};

// ─── Collaborators ──────────────────────────────────────────────────
pub use crate::controller::{CommError, Controller, ControllerFamily};
pub use crate::host::{AlarmReport, EventReport, HostError, HostProtocol, Report};
