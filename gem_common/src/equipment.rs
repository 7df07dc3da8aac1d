//! Equipment document model.
//!
//! The equipment document is the JSON file that declares every status
//! variable, data value, equipment constant, collection event, remote command,
//! monitored controller signal and stored recipe. It is parsed into typed
//! sections for the engine while the raw JSON tree is kept so that persisted
//! rewrites carry unknown fields through untouched.
//!
//! # Module Structure
//!
//! - [`VariableDef`] / [`VariableKind`] - variable declarations per registry
//! - [`CollectionEventDef`] / [`RemoteCommandDef`] - host-facing events and commands
//! - [`SignalDef`] / [`CallBackStep`] - monitored signals and their call-back lists
//! - [`EquipmentDocument`] - the whole document plus eager validation

use crate::config::{ConfigError, load_json};
use crate::consts::{
    DEFAULT_PREMISE_TIMEOUT_SECS, DV_ALARM_STATE, DV_REPLY_FLAG, DV_UPLOAD_RECIPE_ID,
    DV_UPLOAD_RECIPE_NAME, SIGNAL_CONTROL_STATE, SIGNAL_MACHINE_STATE, SV_CURRENT_CONTROL_STATE,
    SV_CURRENT_MACHINE_STATE,
};
use crate::value::{DataType, Value, ValueType};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// The three disjoint variable registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableKind {
    Status,
    Data,
    Constant,
}

impl VariableKind {
    pub const ALL: [VariableKind; 3] = [
        VariableKind::Status,
        VariableKind::Data,
        VariableKind::Constant,
    ];

    /// Document section holding this kind.
    pub fn section(self) -> &'static str {
        match self {
            VariableKind::Status => "status_variable",
            VariableKind::Data => "data_values",
            VariableKind::Constant => "equipment_constant",
        }
    }

    /// Reference prefix used by write values (`sv:`, `dv:`).
    pub fn prefix(self) -> &'static str {
        match self {
            VariableKind::Status => "sv",
            VariableKind::Data => "dv",
            VariableKind::Constant => "ec",
        }
    }
}

impl fmt::Display for VariableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Declaration of one status variable, data value or equipment constant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableDef {
    #[serde(alias = "svid", alias = "dvid", alias = "ecid")]
    pub id: u32,
    pub value_type: ValueType,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Element type of `ARRAY` variables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_value_type: Option<ValueType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<Value>,
}

/// A collection event and the variables each of its reports carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionEventDef {
    pub ceid: u32,
    /// Report id → ordered variable ids (status variables or data values).
    #[serde(default)]
    pub link_reports: BTreeMap<u32, Vec<u32>>,
}

/// A remote command the host may issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteCommandDef {
    #[serde(default)]
    pub rcmd: Option<String>,
    /// Collection event reported when the command completes.
    pub ce_id: u32,
    #[serde(default)]
    pub params: Vec<String>,
}

/// Tag names are strings; offset-based controllers may declare numbers.
fn address_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Address {
        Text(String),
        Offset(u64),
    }
    Ok(match Address::deserialize(deserializer)? {
        Address::Text(text) => text,
        Address::Offset(offset) => offset.to_string(),
    })
}

fn optional_address<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    address_string(deserializer).map(Some)
}

fn default_premise_timeout() -> u32 {
    DEFAULT_PREMISE_TIMEOUT_SECS
}

/// A monitored controller signal (`plc_signal_tag_name` entry).
#[derive(Debug, Clone, Deserialize)]
pub struct SignalDef {
    #[serde(alias = "address", deserialize_with = "address_string")]
    pub tag_name: String,
    pub data_type: DataType,
    /// Trigger value for `loop` signals.
    #[serde(default)]
    pub value: Option<Value>,
    /// Only `loop` signals get a dedicated monitor.
    #[serde(default, rename = "loop")]
    pub looping: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub call_back: Vec<CallBackStep>,
}

/// Operation performed by one call-back step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Read,
    Write,
    WaitEapReply,
    SaveRecipe,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationType::Read => "read",
            OperationType::Write => "write",
            OperationType::WaitEapReply => "wait_eap_reply",
            OperationType::SaveRecipe => "save_recipe",
        };
        f.write_str(name)
    }
}

/// Precondition observed before a gated read or write.
#[derive(Debug, Clone, PartialEq)]
pub struct Premise {
    pub address: String,
    pub data_type: DataType,
    pub value: Value,
    pub timeout_secs: u32,
}

/// Resolved value of a write step.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteValueSpec {
    /// `sv:<name>` / `dv:<name>`: the registry value at execution time.
    Reference(VariableKind, String),
    Literal(Value),
}

impl WriteValueSpec {
    fn from_value(value: &Value) -> Self {
        if let Some(text) = value.as_str() {
            for kind in [VariableKind::Status, VariableKind::Data] {
                if let Some(name) = text
                    .strip_prefix(kind.prefix())
                    .and_then(|rest| rest.strip_prefix(':'))
                {
                    return WriteValueSpec::Reference(kind, name.trim().to_string());
                }
            }
        }
        WriteValueSpec::Literal(value.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum StepValue {
    /// Legacy read target: `"value": {"sv_name": "..."}`.
    Target { sv_name: String },
    Plain(Value),
}

/// One step of a call-back list.
#[derive(Debug, Clone, Deserialize)]
pub struct CallBackStep {
    pub operation_type: OperationType,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "address", deserialize_with = "optional_address")]
    pub tag_name: Option<String>,
    #[serde(default)]
    pub data_type: Option<DataType>,
    #[serde(default, alias = "premise_address", deserialize_with = "optional_address")]
    premise_tag_name: Option<String>,
    #[serde(default)]
    premise_data_type: Option<DataType>,
    #[serde(default)]
    premise_value: Option<Value>,
    #[serde(default = "default_premise_timeout")]
    premise_time_out: u32,
    #[serde(default)]
    pub dv_name: Option<String>,
    #[serde(default)]
    pub sv_name: Option<String>,
    #[serde(default)]
    value: Option<StepValue>,
    /// Collection event reported after the step succeeds.
    #[serde(default)]
    pub event_name: Option<String>,
}

impl CallBackStep {
    /// Precondition of this step, if it is gated.
    pub fn premise(&self) -> Option<Premise> {
        let address = self.premise_tag_name.clone()?;
        Some(Premise {
            address,
            data_type: self
                .premise_data_type
                .or(self.data_type)
                .unwrap_or(DataType::Bool),
            value: self.premise_value.clone().unwrap_or(Value::Bool(true)),
            timeout_secs: self.premise_time_out,
        })
    }

    /// Registry slot a read step stores into. Data values take precedence.
    pub fn read_target(&self) -> Option<(VariableKind, &str)> {
        if let Some(name) = self.dv_name.as_deref() {
            return Some((VariableKind::Data, name));
        }
        if let Some(name) = self.sv_name.as_deref() {
            return Some((VariableKind::Status, name));
        }
        match &self.value {
            Some(StepValue::Target { sv_name }) => Some((VariableKind::Status, sv_name.as_str())),
            _ => None,
        }
    }

    /// Value a write step sends.
    pub fn write_value(&self) -> Option<WriteValueSpec> {
        match &self.value {
            Some(StepValue::Plain(value)) => Some(WriteValueSpec::from_value(value)),
            _ => None,
        }
    }

    fn read_target_count(&self) -> usize {
        let legacy = matches!(self.value, Some(StepValue::Target { .. }));
        [self.dv_name.is_some(), self.sv_name.is_some(), legacy]
            .iter()
            .filter(|set| **set)
            .count()
    }
}

// ─── Document ───────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct Sections {
    #[serde(default)]
    secs_conf: serde_json::Value,
    #[serde(default)]
    status_variable: BTreeMap<String, VariableDef>,
    #[serde(default)]
    data_values: BTreeMap<String, VariableDef>,
    #[serde(default)]
    equipment_constant: BTreeMap<String, VariableDef>,
    #[serde(default)]
    collection_events: BTreeMap<String, CollectionEventDef>,
    #[serde(default)]
    remote_commands: BTreeMap<String, RemoteCommandDef>,
    #[serde(default)]
    plc_signal_tag_name: BTreeMap<String, SignalDef>,
    #[serde(default)]
    recipes: serde_json::Map<String, serde_json::Value>,
}

/// The parsed equipment document.
#[derive(Debug, Clone)]
pub struct EquipmentDocument {
    raw: serde_json::Value,
    /// Host session settings, carried through untouched.
    pub secs_conf: serde_json::Value,
    pub status_variables: BTreeMap<String, VariableDef>,
    pub data_values: BTreeMap<String, VariableDef>,
    pub equipment_constants: BTreeMap<String, VariableDef>,
    pub collection_events: BTreeMap<String, CollectionEventDef>,
    pub remote_commands: BTreeMap<String, RemoteCommandDef>,
    pub signals: BTreeMap<String, SignalDef>,
    pub recipes: serde_json::Map<String, serde_json::Value>,
}

impl EquipmentDocument {
    /// Load and parse the document. Validation is a separate step.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw: serde_json::Value = load_json(path)?;
        let doc = Self::from_json(raw)?;
        debug!(
            path = %path.display(),
            signals = doc.signals.len(),
            events = doc.collection_events.len(),
            "Equipment document loaded"
        );
        Ok(doc)
    }

    pub fn from_json(raw: serde_json::Value) -> Result<Self, ConfigError> {
        if !raw.is_object() {
            return Err(ConfigError::ParseError(
                "equipment document must be a JSON object".to_string(),
            ));
        }
        let sections: Sections = serde_json::from_value(raw.clone())
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        Ok(Self {
            raw,
            secs_conf: sections.secs_conf,
            status_variables: sections.status_variable,
            data_values: sections.data_values,
            equipment_constants: sections.equipment_constant,
            collection_events: sections.collection_events,
            remote_commands: sections.remote_commands,
            signals: sections.plc_signal_tag_name,
            recipes: sections.recipes,
        })
    }

    /// The document exactly as loaded.
    pub fn raw(&self) -> &serde_json::Value {
        &self.raw
    }

    pub fn variables(&self, kind: VariableKind) -> &BTreeMap<String, VariableDef> {
        match kind {
            VariableKind::Status => &self.status_variables,
            VariableKind::Data => &self.data_values,
            VariableKind::Constant => &self.equipment_constants,
        }
    }

    pub fn variable(&self, kind: VariableKind, name: &str) -> Option<&VariableDef> {
        self.variables(kind).get(name)
    }

    pub fn signal(&self, name: &str) -> Option<&SignalDef> {
        self.signals.get(name)
    }

    /// Check every cross-reference up front.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` listing every violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        for kind in VariableKind::ALL {
            let mut seen: HashMap<u32, &str> = HashMap::new();
            for (name, def) in self.variables(kind) {
                if let Some(first) = seen.insert(def.id, name) {
                    problems.push(format!(
                        "duplicate {kind} id {} used by '{first}' and '{name}'",
                        def.id
                    ));
                }
            }
        }

        let reportable = |id: u32| {
            self.status_variables.values().any(|def| def.id == id)
                || self.data_values.values().any(|def| def.id == id)
        };
        for (event, def) in &self.collection_events {
            for (report_id, ids) in &def.link_reports {
                for id in ids.iter().filter(|id| !reportable(**id)) {
                    problems.push(format!(
                        "collection event '{event}' report {report_id} links unknown variable id {id}"
                    ));
                }
            }
        }

        for (name, command) in &self.remote_commands {
            if !self.collection_events.values().any(|def| def.ceid == command.ce_id) {
                problems.push(format!(
                    "remote command '{name}' reports unknown collection event id {}",
                    command.ce_id
                ));
            }
        }

        for (name, signal) in &self.signals {
            if signal.looping && signal.value.is_none() {
                problems.push(format!("signal '{name}' loops but has no trigger value"));
            }
            for (idx, step) in signal.call_back.iter().enumerate() {
                self.check_step(name, idx + 1, step, &mut problems);
            }
        }

        if self.signals.contains_key(SIGNAL_CONTROL_STATE) {
            self.require(VariableKind::Status, SV_CURRENT_CONTROL_STATE, SIGNAL_CONTROL_STATE, &mut problems);
        }
        if self.signals.contains_key(SIGNAL_MACHINE_STATE) {
            self.require(VariableKind::Status, SV_CURRENT_MACHINE_STATE, SIGNAL_MACHINE_STATE, &mut problems);
            self.require(VariableKind::Data, DV_ALARM_STATE, SIGNAL_MACHINE_STATE, &mut problems);
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationError(problems.join("; ")))
        }
    }

    fn require(&self, kind: VariableKind, name: &str, user: &str, problems: &mut Vec<String>) {
        if self.variable(kind, name).is_none() {
            problems.push(format!("variable not found: {kind} '{name}' (required by {user})"));
        }
    }

    fn check_step(&self, signal: &str, idx: usize, step: &CallBackStep, problems: &mut Vec<String>) {
        let at = format!("signal '{signal}' step {idx} ({})", step.operation_type);
        match step.operation_type {
            OperationType::Read | OperationType::Write => {
                if step.tag_name.is_none() {
                    problems.push(format!("{at}: missing tag_name"));
                }
                if step.data_type.is_none() {
                    problems.push(format!("{at}: missing data_type"));
                }
                if step.premise_tag_name.is_some() && step.premise_value.is_none() {
                    problems.push(format!("{at}: premise without premise_value"));
                }
            }
            _ => {}
        }
        match step.operation_type {
            OperationType::Read => {
                if step.read_target_count() != 1 {
                    problems.push(format!("{at}: must name exactly one of dv_name / sv_name"));
                } else if let Some((kind, name)) = step.read_target() {
                    self.require(kind, name, &at, problems);
                }
            }
            OperationType::Write => match step.write_value() {
                None => problems.push(format!("{at}: missing value")),
                Some(WriteValueSpec::Reference(kind, name)) => {
                    self.require(kind, &name, &at, problems)
                }
                Some(WriteValueSpec::Literal(_)) => {}
            },
            OperationType::WaitEapReply => {
                self.require(VariableKind::Data, DV_REPLY_FLAG, &at, problems)
            }
            OperationType::SaveRecipe => {
                self.require(VariableKind::Data, DV_UPLOAD_RECIPE_ID, &at, problems);
                self.require(VariableKind::Data, DV_UPLOAD_RECIPE_NAME, &at, problems);
            }
        }
    }
}

impl FromStr for EquipmentDocument {
    type Err = ConfigError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let raw: serde_json::Value =
            serde_json::from_str(text).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        Self::from_json(raw)
    }
}
