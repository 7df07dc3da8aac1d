//! Simulated controller implementation.
//!
//! The `SimulatedController` implements the `Controller` trait over an
//! in-memory tag table. Tests script read sequences per address, inspect
//! read/write journals, toggle connectivity and inject faults.

use gem_common::controller::{CommError, Controller, ControllerFamily};
use gem_common::value::{DataType, Value};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::trace;

/// Entries kept in each of the read and write journals.
pub const JOURNAL_CAPACITY: usize = 4096;

#[derive(Debug)]
struct SimState {
    tags: HashMap<String, Value>,
    scripts: HashMap<String, VecDeque<Value>>,
    reads: VecDeque<String>,
    writes: VecDeque<(String, Value)>,
    connected: bool,
    read_faults: HashSet<String>,
    write_faults: HashSet<String>,
    connect_attempts: u32,
}

/// In-memory controller.
#[derive(Debug)]
pub struct SimulatedController {
    family: ControllerFamily,
    state: Mutex<SimState>,
}

impl SimulatedController {
    pub fn new(family: ControllerFamily) -> Self {
        Self {
            family,
            state: Mutex::new(SimState {
                tags: HashMap::new(),
                scripts: HashMap::new(),
                reads: VecDeque::with_capacity(JOURNAL_CAPACITY),
                writes: VecDeque::with_capacity(JOURNAL_CAPACITY),
                connected: true,
                read_faults: HashSet::new(),
                write_faults: HashSet::new(),
                connect_attempts: 0,
            }),
        }
    }

    /// Set the current value of an address.
    pub fn set(&self, address: &str, value: impl Into<Value>) {
        self.state.lock().tags.insert(address.to_string(), value.into());
    }

    /// Queue values returned by successive reads of `address`.
    ///
    /// Each read consumes one value; once the queue is drained the last
    /// value becomes the steady state.
    pub fn script<I, V>(&self, address: &str, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.state
            .lock()
            .scripts
            .entry(address.to_string())
            .or_default()
            .extend(values.into_iter().map(Into::into));
    }

    /// Current stored value of an address.
    pub fn value(&self, address: &str) -> Option<Value> {
        self.state.lock().tags.get(address).cloned()
    }

    /// Reads of `address` still in the journal.
    pub fn read_count(&self, address: &str) -> usize {
        self.state.lock().reads.iter().filter(|a| *a == address).count()
    }

    /// Values written to `address`, oldest first.
    pub fn writes_to(&self, address: &str) -> Vec<Value> {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|(a, _)| a == address)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Every journaled write, oldest first.
    pub fn writes(&self) -> Vec<(String, Value)> {
        self.state.lock().writes.iter().cloned().collect()
    }

    pub fn set_connected(&self, connected: bool) {
        self.state.lock().connected = connected;
    }

    pub fn fail_reads(&self, address: &str, fail: bool) {
        let mut state = self.state.lock();
        if fail {
            state.read_faults.insert(address.to_string());
        } else {
            state.read_faults.remove(address);
        }
    }

    pub fn fail_writes(&self, address: &str, fail: bool) {
        let mut state = self.state.lock();
        if fail {
            state.write_faults.insert(address.to_string());
        } else {
            state.write_faults.remove(address);
        }
    }

    pub fn connect_attempts(&self) -> u32 {
        self.state.lock().connect_attempts
    }
}

/// Append to a journal, dropping the oldest entry once it is full.
fn journal<T>(entries: &mut VecDeque<T>, entry: T) {
    if entries.len() == JOURNAL_CAPACITY {
        entries.pop_front();
    }
    entries.push_back(entry);
}

impl Controller for SimulatedController {
    fn name(&self) -> &'static str {
        "simulation"
    }

    fn family(&self) -> ControllerFamily {
        self.family
    }

    fn read(&self, address: &str, data_type: DataType) -> Result<Value, CommError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(CommError::Disconnected);
        }
        if state.read_faults.contains(address) {
            return Err(CommError::read(address, "injected fault"));
        }
        journal(&mut state.reads, address.to_string());
        let scripted = state.scripts.get_mut(address).and_then(VecDeque::pop_front);
        if let Some(value) = scripted {
            state.tags.insert(address.to_string(), value);
        }
        let raw = state
            .tags
            .get(address)
            .cloned()
            .unwrap_or_else(|| data_type.default_value());
        let value = data_type
            .coerce(&raw)
            .ok_or_else(|| CommError::read(address, format!("{raw} is not a {data_type}")))?;
        trace!(address, %value, "Simulated read");
        Ok(value)
    }

    fn write(&self, address: &str, data_type: DataType, value: &Value) -> Result<(), CommError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(CommError::Disconnected);
        }
        if state.write_faults.contains(address) {
            return Err(CommError::write(address, "injected fault"));
        }
        let value = data_type
            .coerce(value)
            .ok_or_else(|| CommError::write(address, format!("{value} is not a {data_type}")))?;
        trace!(address, %value, "Simulated write");
        state.tags.insert(address.to_string(), value.clone());
        journal(&mut state.writes, (address.to_string(), value));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn connect(&self) -> Result<(), CommError> {
        let mut state = self.state.lock();
        state.connect_attempts += 1;
        if state.connected {
            Ok(())
        } else {
            Err(CommError::Disconnected)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_address_reads_default() {
        let plc = SimulatedController::new(ControllerFamily::Tag);
        assert_eq!(plc.read("T1", DataType::Bool).unwrap(), Value::Bool(false));
        assert_eq!(plc.read("T2", DataType::String).unwrap(), Value::from(""));
        assert_eq!(plc.read_count("T1"), 1);
    }

    #[test]
    fn test_script_then_hold_last_value() {
        let plc = SimulatedController::new(ControllerFamily::Tag);
        plc.script("S", [0, 3, 0]);
        let seen: Vec<Value> = (0..5).map(|_| plc.read("S", DataType::Int).unwrap()).collect();
        assert_eq!(
            seen,
            vec![Value::Int(0), Value::Int(3), Value::Int(0), Value::Int(0), Value::Int(0)]
        );
    }

    #[test]
    fn test_write_journal_and_coercion() {
        let plc = SimulatedController::new(ControllerFamily::Address);
        plc.write("D100", DataType::Int, &Value::Bool(true)).unwrap();
        plc.write("D100", DataType::Int, &Value::Int(7)).unwrap();
        assert_eq!(plc.writes_to("D100"), vec![Value::Int(1), Value::Int(7)]);
        assert_eq!(plc.value("D100"), Some(Value::Int(7)));
        assert!(plc.write("D101", DataType::Int, &Value::from("x")).is_err());
        assert_eq!(plc.family(), ControllerFamily::Address);
    }

    #[test]
    fn test_journals_are_bounded() {
        let plc = SimulatedController::new(ControllerFamily::Tag);
        for i in 0..JOURNAL_CAPACITY + 10 {
            plc.read("Poll", DataType::Bool).unwrap();
            plc.write("Out", DataType::Int, &Value::Int(i as i64)).unwrap();
        }
        assert_eq!(plc.read_count("Poll"), JOURNAL_CAPACITY);
        let writes = plc.writes_to("Out");
        assert_eq!(writes.len(), JOURNAL_CAPACITY);
        assert_eq!(writes[0], Value::Int(10));
        assert_eq!(writes.last(), Some(&Value::Int((JOURNAL_CAPACITY + 9) as i64)));
    }

    #[test]
    fn test_connectivity_and_faults() {
        let plc = SimulatedController::new(ControllerFamily::Tag);
        plc.set_connected(false);
        assert!(matches!(plc.read("T", DataType::Bool), Err(CommError::Disconnected)));
        assert!(plc.connect().is_err());
        plc.set_connected(true);
        assert!(plc.connect().is_ok());
        assert_eq!(plc.connect_attempts(), 2);

        plc.fail_reads("T", true);
        assert!(matches!(plc.read("T", DataType::Bool), Err(CommError::Read { .. })));
        plc.fail_reads("T", false);
        assert!(plc.read("T", DataType::Bool).is_ok());

        plc.fail_writes("T", true);
        assert!(matches!(
            plc.write("T", DataType::Bool, &Value::Bool(true)),
            Err(CommError::Write { .. })
        ));
    }
}
