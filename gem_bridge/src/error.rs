//! Error types for the bridge engine.

use gem_common::config::ConfigError;
use gem_common::controller::CommError;
use gem_common::equipment::VariableKind;
use gem_common::host::HostError;
use gem_common::value::{Value, ValueType};
use thiserror::Error;

/// Error types for engine operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Controller read failed (transient)
    #[error("Controller read failed: {0}")]
    CommRead(CommError),

    /// Controller write failed (transient)
    #[error("Controller write failed: {0}")]
    CommWrite(CommError),

    /// A name has no registered id (configuration defect)
    #[error("Variable not found: {kind} '{name}'")]
    VariableNotFound { kind: VariableKind, name: String },

    /// A value cannot be represented by the variable's declared type
    #[error("Value {value} ({}) does not fit '{name}' declared as {expected}", .value.kind())]
    TypeMismatch {
        name: String,
        expected: ValueType,
        value: Value,
    },

    /// A call-back list was aborted at `step`
    #[error("Call-back '{signal}' aborted at step {step} ({description}): {source}")]
    CallBackExecution {
        signal: String,
        step: usize,
        description: String,
        #[source]
        source: Box<BridgeError>,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error(transparent)]
    Host(#[from] HostError),

    /// A worker could not be started
    #[error("Worker '{name}' failed to start: {reason}")]
    Worker { name: String, reason: String },

    /// The worker was asked to stop while waiting
    #[error("Cancelled")]
    Cancelled,
}

impl BridgeError {
    pub fn not_found(kind: VariableKind, name: &str) -> Self {
        BridgeError::VariableNotFound {
            kind,
            name: name.to_string(),
        }
    }

    /// Transient controller faults a watcher swallows and retries.
    pub fn is_transient(&self) -> bool {
        match self {
            BridgeError::CommRead(_) | BridgeError::CommWrite(_) => true,
            BridgeError::CallBackExecution { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

/// Result alias used throughout the engine.
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_error_keeps_source_chain() {
        let err = BridgeError::CallBackExecution {
            signal: "track_in".to_string(),
            step: 2,
            description: "write lot id".to_string(),
            source: Box::new(BridgeError::CommWrite(CommError::write("T3", "nak"))),
        };
        let text = err.to_string();
        assert!(text.contains("track_in"));
        assert!(text.contains("step 2"));
        assert!(text.contains("T3"));
        assert!(err.is_transient());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_type_mismatch_display() {
        let err = BridgeError::TypeMismatch {
            name: "speed".to_string(),
            expected: ValueType::U1,
            value: Value::Int(300),
        };
        assert_eq!(
            err.to_string(),
            "Value 300 (int) does not fit 'speed' declared as UINT_1"
        );
        assert!(!err.is_transient());
    }
}
