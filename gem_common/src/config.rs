//! Configuration loading traits and types.
//!
//! This module provides a standardized way to load the bridge settings file
//! (TOML) and the JSON equipment document.
//!
//! # Usage
//!
//! ```rust,no_run
//! use gem_common::config::{BridgeConfig, ConfigError};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = BridgeConfig::load_resolved(Path::new("bridge.toml"))?;
//!     println!("Service: {}", config.shared.service_name);
//!     Ok(())
//! }
//! ```

use crate::consts::{
    DEFAULT_HEARTBEAT_INTERVAL_SECS, DEFAULT_PERSIST_DEBOUNCE_MS, DEFAULT_RECONNECT_WAIT_SECS,
    EVENT_TRACK_OUT_CARRIER, TRACK_OUT_CARRIER_GRACE_SECS,
};
use crate::controller::ControllerFamily;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Error type for configuration loading operations.
///
/// This enum represents all possible errors that can occur when loading
/// configuration files.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML or JSON parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string understood by `EnvFilter`.
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Common configuration fields shared across bridge binaries.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "gem-bridge-01"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    pub service_name: String,
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = read_config_file(path)?;
        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

/// Load a JSON document (the equipment document is JSON, not TOML).
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = read_config_file(path)?;
    serde_json::from_str(&content)
        .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))
}

fn read_config_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound(path.display().to_string())
        } else {
            ConfigError::ParseError(e.to_string())
        }
    })
}

// ─── Bridge Settings ────────────────────────────────────────────────

/// Paths to the equipment document and alarm table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquipmentPaths {
    /// JSON equipment document.
    pub document: PathBuf,
    /// Optional CSV alarm table.
    #[serde(default)]
    pub alarm_table: Option<PathBuf>,
}

/// Controller driver selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSettings {
    /// Registered driver name (e.g. "simulation").
    #[serde(default = "default_driver")]
    pub driver: String,

    /// Addressing family of the controller.
    #[serde(default)]
    pub family: ControllerFamily,

    /// Driver-specific endpoint; opaque to the engine.
    #[serde(default)]
    pub address: String,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            family: ControllerFamily::default(),
            address: String::new(),
        }
    }
}

fn default_driver() -> String {
    "simulation".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1
}

fn default_premise_poll_interval_ms() -> u64 {
    1000
}

fn default_reply_poll_interval_ms() -> u64 {
    200
}

fn default_reconnect_wait_secs() -> f64 {
    DEFAULT_RECONNECT_WAIT_SECS
}

fn default_heartbeat_interval_secs() -> f64 {
    DEFAULT_HEARTBEAT_INTERVAL_SECS
}

fn default_persist_debounce_ms() -> u64 {
    DEFAULT_PERSIST_DEBOUNCE_MS
}

fn default_event_grace_secs() -> BTreeMap<String, f64> {
    BTreeMap::from([(
        EVENT_TRACK_OUT_CARRIER.to_string(),
        TRACK_OUT_CARRIER_GRACE_SECS,
    )])
}

/// Engine timing knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Idle sleep between monitor polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Premise re-read interval.
    #[serde(default = "default_premise_poll_interval_ms")]
    pub premise_poll_interval_ms: u64,

    /// Sleep between reply-flag checks.
    #[serde(default = "default_reply_poll_interval_ms")]
    pub reply_poll_interval_ms: u64,

    /// Used when the document has no `reconnect_plc_wait_time` data value.
    #[serde(default = "default_reconnect_wait_secs")]
    pub reconnect_wait_secs: f64,

    /// Used when the document has no `mes_heart_time_gap` data value.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: f64,

    /// Debounce for document rewrites; 0 writes synchronously.
    #[serde(default = "default_persist_debounce_ms")]
    pub persist_debounce_ms: u64,

    /// Delay before sending specific collection events.
    #[serde(default = "default_event_grace_secs")]
    pub event_grace_secs: BTreeMap<String, f64>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            premise_poll_interval_ms: default_premise_poll_interval_ms(),
            reply_poll_interval_ms: default_reply_poll_interval_ms(),
            reconnect_wait_secs: default_reconnect_wait_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            persist_debounce_ms: default_persist_debounce_ms(),
            event_grace_secs: default_event_grace_secs(),
        }
    }
}

impl EngineSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn premise_poll_interval(&self) -> Duration {
        Duration::from_millis(self.premise_poll_interval_ms)
    }

    pub fn reply_poll_interval(&self) -> Duration {
        Duration::from_millis(self.reply_poll_interval_ms)
    }

    pub fn persist_debounce(&self) -> Duration {
        Duration::from_millis(self.persist_debounce_ms)
    }

    /// Grace period configured for `event`, if any.
    pub fn event_grace(&self, event: &str) -> Option<Duration> {
        self.event_grace_secs
            .get(event)
            .filter(|secs| **secs > 0.0)
            .map(|secs| Duration::from_secs_f64(*secs))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.premise_poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "premise_poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.reply_poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "reply_poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if !(self.reconnect_wait_secs.is_finite() && self.reconnect_wait_secs >= 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "reconnect_wait_secs must be a non-negative number, got {}",
                self.reconnect_wait_secs
            )));
        }
        if !(self.heartbeat_interval_secs.is_finite() && self.heartbeat_interval_secs > 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "heartbeat_interval_secs must be positive, got {}",
                self.heartbeat_interval_secs
            )));
        }
        if let Some((name, secs)) = self
            .event_grace_secs
            .iter()
            .find(|(_, secs)| !(secs.is_finite() && **secs >= 0.0))
        {
            return Err(ConfigError::ValidationError(format!(
                "event_grace_secs.{name} must be a non-negative number, got {secs}"
            )));
        }
        Ok(())
    }
}

/// Bridge settings loaded from `bridge.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub shared: SharedConfig,
    pub equipment: EquipmentPaths,
    #[serde(default)]
    pub controller: ControllerSettings,
    #[serde(default)]
    pub engine: EngineSettings,
}

impl BridgeConfig {
    /// Load, resolve relative paths against the settings file's directory, and validate.
    pub fn load_resolved(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        let base = path.parent().unwrap_or(Path::new("."));
        config.equipment.document = resolve_path(base, &config.equipment.document);
        config.equipment.alarm_table = config
            .equipment
            .alarm_table
            .as_ref()
            .map(|table| resolve_path(base, table));
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        if self.equipment.document.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "equipment.document cannot be empty".to_string(),
            ));
        }
        if self.controller.driver.is_empty() {
            return Err(ConfigError::ValidationError(
                "controller.driver cannot be empty".to_string(),
            ));
        }
        self.engine.validate()
    }
}

/// Resolve a possibly relative path against a base directory.
fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
