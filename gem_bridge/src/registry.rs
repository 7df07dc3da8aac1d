//! Variable registry.
//!
//! Owns the status variables, data values and equipment constants. Each of
//! the three tables sits behind its own `RwLock`, so a watcher updating a
//! data value never contends with a host request reading a status variable.
//!
//! Values are coerced into the declared [`ValueType`] on every `set`; the
//! declared type itself never changes.

use crate::error::{BridgeError, BridgeResult};
use gem_common::equipment::{EquipmentDocument, VariableDef, VariableKind};
use gem_common::value::{ReportValue, Value, ValueType};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::trace;

/// One registered variable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableEntry {
    pub id: u32,
    pub name: String,
    pub value_type: ValueType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_value_type: Option<ValueType>,
    pub value: Value,
}

impl VariableEntry {
    fn from_def(name: &str, def: &VariableDef) -> BridgeResult<Self> {
        let value = match &def.value {
            Some(value) => coerce(name, def.value_type, def.base_value_type, value)?,
            None => def.value_type.default_value(),
        };
        Ok(Self {
            id: def.id,
            name: name.to_string(),
            value_type: def.value_type,
            base_value_type: def.base_value_type,
            value,
        })
    }

    pub fn report_value(&self) -> ReportValue {
        ReportValue::typed(self.value_type, self.base_value_type, &self.value)
    }
}

fn coerce(
    name: &str,
    value_type: ValueType,
    base: Option<ValueType>,
    value: &Value,
) -> BridgeResult<Value> {
    value_type
        .coerce(value, base)
        .ok_or_else(|| BridgeError::TypeMismatch {
            name: name.to_string(),
            expected: value_type,
            value: value.clone(),
        })
}

#[derive(Debug, Default)]
struct VariableTable {
    by_id: HashMap<u32, VariableEntry>,
    ids: HashMap<String, u32>,
}

impl VariableTable {
    fn build(defs: &BTreeMap<String, VariableDef>) -> BridgeResult<Self> {
        let mut table = Self::default();
        for (name, def) in defs {
            let entry = VariableEntry::from_def(name, def)?;
            table.ids.insert(name.clone(), entry.id);
            table.by_id.insert(entry.id, entry);
        }
        Ok(table)
    }

    fn entry(&self, name: &str) -> Option<&VariableEntry> {
        self.ids.get(name).and_then(|id| self.by_id.get(id))
    }
}

/// Thread-safe store of every reportable value.
#[derive(Debug, Default)]
pub struct VariableRegistry {
    status: RwLock<VariableTable>,
    data: RwLock<VariableTable>,
    constants: RwLock<VariableTable>,
}

impl VariableRegistry {
    /// Build the three tables from the document's declarations.
    ///
    /// # Errors
    /// `BridgeError::TypeMismatch` when a declared initial value does not fit
    /// its declared type.
    pub fn from_document(doc: &EquipmentDocument) -> BridgeResult<Self> {
        Ok(Self {
            status: RwLock::new(VariableTable::build(&doc.status_variables)?),
            data: RwLock::new(VariableTable::build(&doc.data_values)?),
            constants: RwLock::new(VariableTable::build(&doc.equipment_constants)?),
        })
    }

    fn table(&self, kind: VariableKind) -> &RwLock<VariableTable> {
        match kind {
            VariableKind::Status => &self.status,
            VariableKind::Data => &self.data,
            VariableKind::Constant => &self.constants,
        }
    }

    pub fn get(&self, kind: VariableKind, name: &str) -> BridgeResult<Value> {
        self.table(kind)
            .read()
            .entry(name)
            .map(|entry| entry.value.clone())
            .ok_or_else(|| BridgeError::not_found(kind, name))
    }

    /// Store `value`, coerced into the declared type. Returns the stored value.
    ///
    /// # Errors
    /// `VariableNotFound` for unknown names, `TypeMismatch` when coercion fails
    /// (the previous value is kept).
    pub fn set(&self, kind: VariableKind, name: &str, value: Value) -> BridgeResult<Value> {
        let mut table = self.table(kind).write();
        let id = *table
            .ids
            .get(name)
            .ok_or_else(|| BridgeError::not_found(kind, name))?;
        let entry = table
            .by_id
            .get_mut(&id)
            .ok_or_else(|| BridgeError::not_found(kind, name))?;
        let stored = coerce(name, entry.value_type, entry.base_value_type, &value)?;
        trace!(%kind, name, value = %stored, "Variable updated");
        entry.value = stored.clone();
        Ok(stored)
    }

    pub fn resolve_id(&self, kind: VariableKind, name: &str) -> BridgeResult<u32> {
        self.table(kind)
            .read()
            .ids
            .get(name)
            .copied()
            .ok_or_else(|| BridgeError::not_found(kind, name))
    }

    pub fn contains(&self, kind: VariableKind, name: &str) -> bool {
        self.table(kind).read().ids.contains_key(name)
    }

    pub fn entry(&self, kind: VariableKind, name: &str) -> Option<VariableEntry> {
        self.table(kind).read().entry(name).cloned()
    }

    pub fn entry_by_id(&self, kind: VariableKind, id: u32) -> Option<VariableEntry> {
        self.table(kind).read().by_id.get(&id).cloned()
    }

    /// Typed value of a report variable; status variables shadow data values.
    pub fn report_value(&self, id: u32) -> Option<ReportValue> {
        [VariableKind::Status, VariableKind::Data]
            .into_iter()
            .find_map(|kind| self.table(kind).read().by_id.get(&id).map(VariableEntry::report_value))
    }

    /// Current value, or `default` when the name is absent or not numeric.
    pub fn get_f64_or(&self, kind: VariableKind, name: &str, default: f64) -> f64 {
        self.get(kind, name)
            .ok()
            .and_then(|value| value.as_f64())
            .unwrap_or(default)
    }

    /// Every entry of one table, ordered by id.
    pub fn snapshot(&self, kind: VariableKind) -> Vec<VariableEntry> {
        let mut entries: Vec<VariableEntry> = self.table(kind).read().by_id.values().cloned().collect();
        entries.sort_by_key(|entry| entry.id);
        entries
    }

    pub fn len(&self, kind: VariableKind) -> usize {
        self.table(kind).read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        VariableKind::ALL.iter().all(|kind| self.len(*kind) == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn registry() -> VariableRegistry {
        let doc: EquipmentDocument = r#"{
            "status_variable": {
                "current_machine_state": {"svid": 2, "value_type": "UINT_1", "value": 1},
                "lot_ids": {"svid": 3, "value_type": "ARRAY", "base_value_type": "ASCII"}
            },
            "data_values": {
                "temp": {"dvid": 100, "value_type": "F4", "value": 1},
                "counter": {"dvid": 101, "value_type": "UINT_4"}
            },
            "equipment_constant": {
                "max_speed": {"ecid": 500, "value_type": "UINT_4", "value": 10}
            }
        }"#
        .parse()
        .unwrap();
        VariableRegistry::from_document(&doc).unwrap()
    }

    #[test]
    fn test_initial_values_are_coerced() {
        let reg = registry();
        assert_eq!(reg.get(VariableKind::Data, "temp").unwrap(), Value::Float(1.0));
        assert_eq!(reg.get(VariableKind::Data, "counter").unwrap(), Value::Int(0));
        assert_eq!(reg.get(VariableKind::Status, "lot_ids").unwrap(), Value::List(vec![]));
        assert_eq!(reg.get(VariableKind::Constant, "max_speed").unwrap(), Value::Int(10));
    }

    #[test]
    fn test_set_get_and_resolve() {
        let reg = registry();
        let stored = reg
            .set(VariableKind::Status, "current_machine_state", Value::Float(3.0))
            .unwrap();
        assert_eq!(stored, Value::Int(3));
        assert_eq!(reg.get(VariableKind::Status, "current_machine_state").unwrap(), Value::Int(3));
        assert_eq!(reg.resolve_id(VariableKind::Status, "current_machine_state").unwrap(), 2);
    }

    #[test]
    fn test_unknown_name_is_variable_not_found() {
        let reg = registry();
        assert!(matches!(
            reg.get(VariableKind::Data, "missing"),
            Err(BridgeError::VariableNotFound { kind: VariableKind::Data, .. })
        ));
        // Names are per registry.
        assert!(reg.resolve_id(VariableKind::Status, "temp").is_err());
    }

    #[test]
    fn test_type_mismatch_keeps_previous_value() {
        let reg = registry();
        let result = reg.set(VariableKind::Status, "current_machine_state", Value::Int(999));
        assert!(matches!(result, Err(BridgeError::TypeMismatch { .. })));
        assert_eq!(reg.get(VariableKind::Status, "current_machine_state").unwrap(), Value::Int(1));
    }

    #[test]
    fn test_initial_value_mismatch_fails_build() {
        let doc: EquipmentDocument =
            r#"{"data_values": {"x": {"dvid": 1, "value_type": "UINT_1", "value": -4}}}"#
                .parse()
                .unwrap();
        assert!(matches!(
            VariableRegistry::from_document(&doc),
            Err(BridgeError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_report_value_typing() {
        let reg = registry();
        reg.set(VariableKind::Status, "lot_ids", Value::List(vec![Value::Int(7)]))
            .unwrap();
        let report = reg.report_value(3).unwrap();
        assert_eq!(report.item_type, Some(ValueType::Ascii));
        assert_eq!(report.value, Value::List(vec![Value::from("7")]));
        assert_eq!(reg.report_value(100).unwrap().value_type, ValueType::F4);
        assert!(reg.report_value(500).is_none());
    }

    #[test]
    fn test_concurrent_writers_on_different_tables() {
        let reg = Arc::new(registry());
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let reg = Arc::clone(&reg);
                thread::spawn(move || {
                    for i in 0..200 {
                        if worker % 2 == 0 {
                            reg.set(VariableKind::Data, "counter", Value::Int(i)).unwrap();
                        } else {
                            let _ = reg.get(VariableKind::Status, "current_machine_state").unwrap();
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(reg.get(VariableKind::Data, "counter").unwrap(), Value::Int(199));
    }

    #[test]
    fn test_snapshot_ordered_by_id() {
        let reg = registry();
        let ids: Vec<u32> = reg.snapshot(VariableKind::Data).iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![100, 101]);
        assert!(!reg.is_empty());
    }
}
