//! Alarm table and alarm lifecycle.
//!
//! The alarm table is loaded once from CSV (`id, name, text, code, event_on,
//! event_off`, header skipped) and never changes. [`AlarmLifecycle`] turns
//! machine-state transitions into alarm set/clear reports: on entry it reads
//! the active alarm id from the controller and resolves the text; on exit it
//! clears the alarm that was last raised.

use crate::dispatcher::EventDispatcher;
use crate::error::{BridgeError, BridgeResult};
use crate::registry::VariableRegistry;
use gem_common::config::ConfigError;
use gem_common::consts::{
    DEFAULT_CLEAR_ALARM_CODE, DEFAULT_OCCUR_ALARM_CODE, DV_CLEAR_ALARM_CODE, DV_OCCUR_ALARM_CODE,
    UNDEFINED_ALARM_TEXT,
};
use gem_common::controller::Controller;
use gem_common::equipment::{SignalDef, VariableKind};
use gem_common::host::AlarmReport;
use gem_common::value::DataType;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// One row of the alarm table.
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmDef {
    pub id: String,
    pub name: String,
    pub text: String,
    pub code: i64,
    pub event_on: String,
    pub event_off: String,
}

/// Immutable alarm lookup table keyed by alarm id.
#[derive(Debug, Clone, Default)]
pub struct AlarmTable {
    alarms: HashMap<String, AlarmDef>,
}

impl AlarmTable {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = std::fs::File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(path.display().to_string())
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;
        let table = Self::from_reader(file)
            .map_err(|e| match e {
                ConfigError::ParseError(msg) => ConfigError::ParseError(format!("{}: {msg}", path.display())),
                other => other,
            })?;
        info!(path = %path.display(), alarms = table.len(), "Alarm table loaded");
        Ok(table)
    }

    /// Parse CSV rows; columns past `event_off` are ignored.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ConfigError> {
        let mut csv = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut alarms = HashMap::new();
        for (idx, record) in csv.records().enumerate() {
            let record = record.map_err(|e| ConfigError::ParseError(e.to_string()))?;
            let field = |i: usize| record.get(i).unwrap_or_default().to_string();
            if record.len() < 6 {
                return Err(ConfigError::ParseError(format!(
                    "alarm row {} has {} columns, expected 6",
                    idx + 2,
                    record.len()
                )));
            }
            let code = field(3).parse::<i64>().map_err(|e| {
                ConfigError::ParseError(format!("alarm row {}: bad code '{}': {e}", idx + 2, field(3)))
            })?;
            let alarm = AlarmDef {
                id: field(0),
                name: field(1),
                text: field(2),
                code,
                event_on: field(4),
                event_off: field(5),
            };
            alarms.insert(alarm.id.clone(), alarm);
        }
        Ok(Self { alarms })
    }

    pub fn get(&self, id: &str) -> Option<&AlarmDef> {
        self.alarms.get(id.trim())
    }

    pub fn len(&self) -> usize {
        self.alarms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alarms.is_empty()
    }
}

#[derive(Debug, Clone)]
struct ActiveAlarm {
    alarm_id: u32,
    text: String,
    def: Option<AlarmDef>,
}

/// Raises and clears alarms for the machine-state watcher.
pub struct AlarmLifecycle {
    table: Arc<AlarmTable>,
    controller: Arc<dyn Controller>,
    registry: Arc<VariableRegistry>,
    dispatcher: Arc<EventDispatcher>,
    alarm_id_signal: Option<SignalDef>,
    active: Mutex<Option<ActiveAlarm>>,
}

impl AlarmLifecycle {
    pub fn new(
        table: Arc<AlarmTable>,
        controller: Arc<dyn Controller>,
        registry: Arc<VariableRegistry>,
        dispatcher: Arc<EventDispatcher>,
        alarm_id_signal: Option<SignalDef>,
    ) -> Self {
        Self {
            table,
            controller,
            registry,
            dispatcher,
            alarm_id_signal,
            active: Mutex::new(None),
        }
    }

    fn code(&self, name: &str, default: i64) -> i64 {
        self.registry
            .get(VariableKind::Data, name)
            .ok()
            .and_then(|value| value.as_i64())
            .unwrap_or(default)
    }

    /// Read the active alarm id from the controller and report it as set.
    ///
    /// # Errors
    /// `BridgeError::CommRead` when the alarm id cannot be read; nothing is
    /// reported in that case.
    pub fn occur(&self) -> BridgeResult<AlarmReport> {
        let raw_id = match &self.alarm_id_signal {
            Some(signal) => self
                .controller
                .read(&signal.tag_name, DataType::String)
                .map_err(BridgeError::CommRead)?
                .to_string(),
            None => String::new(),
        };
        let raw_id = raw_id.trim().to_string();
        let alarm_id = raw_id.parse::<u32>().unwrap_or_else(|_| {
            warn!(alarm_id = %raw_id, "Alarm id is not numeric, reporting 0");
            0
        });
        let def = self.table.get(&raw_id).cloned();
        let text = def
            .as_ref()
            .map(|def| def.text.clone())
            .unwrap_or_else(|| UNDEFINED_ALARM_TEXT.to_string());
        info!(alarm_id, text = %text, "Alarm occurred");

        let report = AlarmReport {
            alarm_code: self.code(DV_OCCUR_ALARM_CODE, DEFAULT_OCCUR_ALARM_CODE),
            alarm_id,
            alarm_text: text.clone(),
            occurred: true,
        };
        self.dispatcher.send_alarm(report.clone());
        if let Some(def) = &def {
            self.send_linked_event(&def.event_on);
        }
        *self.active.lock() = Some(ActiveAlarm { alarm_id, text, def });
        Ok(report)
    }

    /// Report the last raised alarm as cleared.
    pub fn clear(&self) -> AlarmReport {
        let active = self.active.lock().take().unwrap_or(ActiveAlarm {
            alarm_id: 0,
            text: UNDEFINED_ALARM_TEXT.to_string(),
            def: None,
        });
        info!(alarm_id = active.alarm_id, "Alarm cleared");
        let report = AlarmReport {
            alarm_code: self.code(DV_CLEAR_ALARM_CODE, DEFAULT_CLEAR_ALARM_CODE),
            alarm_id: active.alarm_id,
            alarm_text: active.text,
            occurred: false,
        };
        self.dispatcher.send_alarm(report.clone());
        if let Some(def) = &active.def {
            self.send_linked_event(&def.event_off);
        }
        report
    }

    /// Id of the alarm currently raised, if any.
    pub fn active_alarm(&self) -> Option<u32> {
        self.active.lock().as_ref().map(|a| a.alarm_id)
    }

    fn send_linked_event(&self, ceid: &str) {
        let Ok(ceid) = ceid.trim().parse::<u32>() else {
            return;
        };
        if let Some(name) = self.dispatcher.event_name(ceid) {
            let name = name.to_string();
            self.dispatcher.send_event(&name);
        }
    }
}
