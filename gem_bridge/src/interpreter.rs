//! Call-back interpreter.
//!
//! Executes the ordered call-back lists declared on controller signals. Steps
//! run strictly in order; the first failing step aborts the rest of the list
//! and the failure is returned wrapped in `BridgeError::CallBackExecution`.
//!
//! # Step Semantics
//!
//! | Operation        | Effect                                                    |
//! |------------------|-----------------------------------------------------------|
//! | `read`           | optional premise, read address, store into sv/dv          |
//! | `write`          | optional premise, resolve `sv:`/`dv:` reference, write    |
//! | `wait_eap_reply` | sleep-poll dv `reply_flag` until true, then clear it      |
//! | `save_recipe`    | key `{upload_recipe_id}_{upload_recipe_name}`, persist    |
//!
//! A premise that never matches is a soft timeout: it is logged and counted,
//! and the step's main operation still runs.

use crate::dispatcher::EventDispatcher;
use crate::error::{BridgeError, BridgeResult};
use crate::persistence::DocumentStore;
use crate::recipe::RecipeRegistry;
use crate::registry::VariableRegistry;
use crate::stats::WorkerStats;
use crate::supervisor::StopToken;
use gem_common::config::EngineSettings;
use gem_common::consts::{DV_REPLY_FLAG, DV_UPLOAD_RECIPE_ID, DV_UPLOAD_RECIPE_NAME};
use gem_common::controller::Controller;
use gem_common::equipment::{CallBackStep, OperationType, Premise, VariableKind, WriteValueSpec};
use gem_common::value::{DataType, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Timing used by the interpreter.
#[derive(Debug, Clone)]
pub struct InterpreterTiming {
    pub premise_poll: Duration,
    pub reply_poll: Duration,
    /// Delay before reporting specific collection events.
    pub event_grace: BTreeMap<String, Duration>,
}

impl InterpreterTiming {
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            premise_poll: settings.premise_poll_interval(),
            reply_poll: settings.reply_poll_interval(),
            event_grace: settings
                .event_grace_secs
                .keys()
                .filter_map(|name| settings.event_grace(name).map(|d| (name.clone(), d)))
                .collect(),
        }
    }
}

/// Result of waiting for a premise.
#[derive(Debug, Clone, PartialEq)]
pub enum PremiseOutcome {
    Matched { reads: u32 },
    /// Soft timeout; the gated operation proceeds.
    TimedOut { reads: u32, last: Value },
}

/// Summary of one successful call-back run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionReport {
    pub steps: usize,
    pub premise_timeouts: u32,
    pub events: Vec<String>,
}

pub struct CallBackInterpreter {
    controller: Arc<dyn Controller>,
    registry: Arc<VariableRegistry>,
    dispatcher: Arc<EventDispatcher>,
    recipes: Arc<RecipeRegistry>,
    store: Arc<DocumentStore>,
    timing: InterpreterTiming,
}

impl CallBackInterpreter {
    pub fn new(
        controller: Arc<dyn Controller>,
        registry: Arc<VariableRegistry>,
        dispatcher: Arc<EventDispatcher>,
        recipes: Arc<RecipeRegistry>,
        store: Arc<DocumentStore>,
        timing: InterpreterTiming,
    ) -> Self {
        Self {
            controller,
            registry,
            dispatcher,
            recipes,
            store,
            timing,
        }
    }

    /// Run `steps` in order on behalf of `signal`.
    ///
    /// # Errors
    /// `BridgeError::CallBackExecution` wrapping the first step failure, or
    /// `BridgeError::Cancelled` when `token` stops mid-run.
    pub fn execute(
        &self,
        signal: &str,
        steps: &[CallBackStep],
        token: &StopToken,
        stats: Option<&WorkerStats>,
    ) -> BridgeResult<ExecutionReport> {
        let mut report = ExecutionReport::default();
        for (idx, step) in steps.iter().enumerate() {
            let number = idx + 1;
            info!(signal, step = number, operation = %step.operation_type, "Step start: {}", step.description);
            match self.run_step(step, token, stats, &mut report) {
                Ok(()) => {}
                Err(BridgeError::Cancelled) => return Err(BridgeError::Cancelled),
                Err(source) => {
                    error!(
                        signal,
                        step = number,
                        address = step.tag_name.as_deref().unwrap_or("-"),
                        "Step failed: {}: {source}",
                        step.description
                    );
                    return Err(BridgeError::CallBackExecution {
                        signal: signal.to_string(),
                        step: number,
                        description: step.description.clone(),
                        source: Box::new(source),
                    });
                }
            }
            if let Some(event) = self.send_step_event(step, token)? {
                report.events.push(event);
            }
            report.steps += 1;
            info!(signal, step = number, "Step done: {}", step.description);
        }
        Ok(report)
    }

    fn run_step(
        &self,
        step: &CallBackStep,
        token: &StopToken,
        stats: Option<&WorkerStats>,
        report: &mut ExecutionReport,
    ) -> BridgeResult<()> {
        if matches!(step.operation_type, OperationType::Read | OperationType::Write) {
            if let Some(premise) = step.premise() {
                if let PremiseOutcome::TimedOut { reads, last } = self.await_premise(&premise, token)? {
                    warn!(
                        premise = %premise.address,
                        expected = %premise.value,
                        actual = %last,
                        reads,
                        "Premise timed out after {}s, continuing: {}",
                        premise.timeout_secs,
                        step.description
                    );
                    report.premise_timeouts += 1;
                    if let Some(stats) = stats {
                        stats.record_premise_timeout();
                    }
                }
            }
        }
        match step.operation_type {
            OperationType::Read => self.read_step(step),
            OperationType::Write => self.write_step(step),
            OperationType::WaitEapReply => self.wait_reply(token),
            OperationType::SaveRecipe => self.save_recipe(),
        }
    }

    /// Poll the premise address until it matches or the countdown runs out.
    ///
    /// Reads the premise `timeout_secs` times (at least once), sleeping one
    /// premise poll interval after every read that does not match.
    pub fn await_premise(&self, premise: &Premise, token: &StopToken) -> BridgeResult<PremiseOutcome> {
        let attempts = premise.timeout_secs.max(1);
        let mut reads = 0;
        loop {
            let actual = self
                .controller
                .read(&premise.address, premise.data_type)
                .map_err(BridgeError::CommRead)?;
            reads += 1;
            if actual.loosely_eq(&premise.value) {
                debug!(premise = %premise.address, reads, "Premise matched");
                return Ok(PremiseOutcome::Matched { reads });
            }
            debug!(premise = %premise.address, actual = %actual, expected = %premise.value, reads, "Premise not met");
            if premise.timeout_secs > 0 {
                token.sleep(self.timing.premise_poll)?;
            }
            if reads >= attempts {
                return Ok(PremiseOutcome::TimedOut { reads, last: actual });
            }
        }
    }

    fn step_target<'a>(step: &'a CallBackStep) -> BridgeResult<(&'a str, DataType)> {
        let address = step
            .tag_name
            .as_deref()
            .ok_or_else(|| missing_field(step, "tag_name"))?;
        let data_type = step.data_type.ok_or_else(|| missing_field(step, "data_type"))?;
        Ok((address, data_type))
    }

    fn read_step(&self, step: &CallBackStep) -> BridgeResult<()> {
        let (address, data_type) = Self::step_target(step)?;
        let (kind, name) = step
            .read_target()
            .ok_or_else(|| missing_field(step, "dv_name/sv_name"))?;
        let value = self
            .controller
            .read(address, data_type)
            .map_err(BridgeError::CommRead)?;
        let stored = self.registry.set(kind, name, value)?;
        info!(address, %kind, name, value = %stored, "Stored read value");
        Ok(())
    }

    fn resolve_write_value(&self, spec: &WriteValueSpec) -> BridgeResult<Value> {
        match spec {
            WriteValueSpec::Reference(kind, name) => self.registry.get(*kind, name),
            WriteValueSpec::Literal(value) => Ok(value.clone()),
        }
    }

    fn write_step(&self, step: &CallBackStep) -> BridgeResult<()> {
        let (address, data_type) = Self::step_target(step)?;
        let spec = step.write_value().ok_or_else(|| missing_field(step, "value"))?;
        let value = self.resolve_write_value(&spec)?;
        self.write_value(address, data_type, &value)
    }

    /// Write a scalar, or fan a list out to `address[1]`, `address[2]`, ...
    pub fn write_value(&self, address: &str, data_type: DataType, value: &Value) -> BridgeResult<()> {
        match value {
            Value::List(items) => {
                for (idx, item) in items.iter().enumerate() {
                    let element = format!("{address}[{}]", idx + 1);
                    self.controller
                        .write(&element, data_type, item)
                        .map_err(BridgeError::CommWrite)?;
                }
                info!(address, elements = items.len(), "Wrote list value");
            }
            scalar => {
                self.controller
                    .write(address, data_type, scalar)
                    .map_err(BridgeError::CommWrite)?;
                info!(address, value = %scalar, "Wrote value");
            }
        }
        Ok(())
    }

    fn wait_reply(&self, token: &StopToken) -> BridgeResult<()> {
        let mut waited = 0u32;
        while !self.registry.get(VariableKind::Data, DV_REPLY_FLAG)?.is_truthy() {
            if waited % 25 == 0 {
                info!(waited_polls = waited, "Waiting for host reply");
            }
            waited += 1;
            token.sleep(self.timing.reply_poll)?;
        }
        self.registry
            .set(VariableKind::Data, DV_REPLY_FLAG, Value::Bool(false))?;
        info!("Host reply received");
        Ok(())
    }

    fn save_recipe(&self) -> BridgeResult<()> {
        let id = self.registry.get(VariableKind::Data, DV_UPLOAD_RECIPE_ID)?;
        let name = self.registry.get(VariableKind::Data, DV_UPLOAD_RECIPE_NAME)?;
        let (key, persisted) = self
            .recipes
            .save(&id.to_string(), &name.to_string(), |table| self.store.set_recipes(table.clone()));
        persisted?;
        info!(recipe = %key, "Uploaded recipe saved");
        Ok(())
    }

    /// Report the step's collection event, after its grace period if one is set.
    fn send_step_event(&self, step: &CallBackStep, token: &StopToken) -> BridgeResult<Option<String>> {
        let Some(event) = step.event_name.as_deref() else {
            return Ok(None);
        };
        if !self.dispatcher.is_registered(event) {
            debug!(event, "Step event is not a registered collection event");
            return Ok(None);
        }
        if let Some(grace) = self.timing.event_grace.get(event) {
            info!(event, grace_ms = grace.as_millis() as u64, "Delaying event report");
            token.sleep(*grace)?;
        }
        Ok(self.dispatcher.send_event(event).then(|| event.to_string()))
    }
}

fn missing_field(step: &CallBackStep, field: &str) -> BridgeError {
    BridgeError::Config(gem_common::config::ConfigError::ValidationError(format!(
        "{} step '{}' has no {field}",
        step.operation_type, step.description
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::simulation::SimulatedController;
    use gem_common::controller::ControllerFamily;
    use gem_common::equipment::EquipmentDocument;
    use std::sync::mpsc::Receiver;
    use std::thread;

    use crate::dispatcher::DispatchJob;

    struct Rig {
        plc: Arc<SimulatedController>,
        registry: Arc<VariableRegistry>,
        recipes: Arc<RecipeRegistry>,
        store: Arc<DocumentStore>,
        interpreter: CallBackInterpreter,
        jobs: Receiver<DispatchJob>,
        doc: EquipmentDocument,
    }

    const DOC: &str = r#"{
        "status_variable": {"lot": {"svid": 1, "value_type": "ASCII", "value": "L1"}},
        "data_values": {
            "temp": {"dvid": 10, "value_type": "F4", "value": 0},
            "slots": {"dvid": 11, "value_type": "ARRAY", "base_value_type": "UINT_4", "value": [4, 5, 6]},
            "reply_flag": {"dvid": 12, "value_type": "BOOL", "value": false},
            "upload_recipe_id": {"dvid": 13, "value_type": "UINT_4", "value": 0},
            "upload_recipe_name": {"dvid": 14, "value_type": "ASCII", "value": ""}
        },
        "collection_events": {
            "temp_read": {"ceid": 100, "link_reports": {"1": [10]}},
            "track_out_carrier": {"ceid": 101, "link_reports": {"1": [1]}}
        },
        "plc_signal_tag_name": {
            "seq": {"tag_name": "T1", "data_type": "bool", "value": true, "loop": true, "call_back": [
                {"operation_type": "read", "tag_name": "T2", "data_type": "float", "dv_name": "temp",
                 "description": "read temp", "event_name": "temp_read"},
                {"operation_type": "write", "tag_name": "T3", "data_type": "float", "value": "dv:temp",
                 "description": "echo temp"}
            ]},
            "gated": {"tag_name": "G", "data_type": "bool", "call_back": [
                {"operation_type": "read", "tag_name": "T2", "data_type": "float", "dv_name": "temp",
                 "premise_tag_name": "P", "premise_data_type": "bool", "premise_value": true,
                 "premise_time_out": 2, "description": "gated read"}
            ]},
            "fanout": {"tag_name": "F", "data_type": "bool", "call_back": [
                {"operation_type": "write", "tag_name": "Slot", "data_type": "int", "value": "dv:slots",
                 "description": "write slots"}
            ]},
            "broken": {"tag_name": "B", "data_type": "bool", "call_back": [
                {"operation_type": "write", "tag_name": "W1", "data_type": "int", "value": 1, "description": "first"},
                {"operation_type": "write", "tag_name": "W2", "data_type": "int", "value": 2, "description": "second"},
                {"operation_type": "write", "tag_name": "W3", "data_type": "int", "value": 3, "description": "third"}
            ]},
            "reply": {"tag_name": "R", "data_type": "bool", "call_back": [
                {"operation_type": "wait_eap_reply", "description": "wait host"}
            ]},
            "recipe": {"tag_name": "S", "data_type": "bool", "call_back": [
                {"operation_type": "save_recipe", "description": "save recipe"}
            ]},
            "late": {"tag_name": "L", "data_type": "bool", "call_back": [
                {"operation_type": "write", "tag_name": "Done", "data_type": "bool", "value": true,
                 "event_name": "track_out_carrier"}
            ]}
        },
        "recipes": {"5_old": {}}
    }"#;

    fn rig(dir: &std::path::Path) -> Rig {
        let doc: EquipmentDocument = DOC.parse().unwrap();
        doc.validate().unwrap();
        let plc = Arc::new(SimulatedController::new(ControllerFamily::Tag));
        let registry = Arc::new(VariableRegistry::from_document(&doc).unwrap());
        let dispatcher = Arc::new(EventDispatcher::new(doc.collection_events.clone(), Arc::clone(&registry)));
        let jobs = dispatcher.take_receiver().unwrap();
        let recipes = Arc::new(RecipeRegistry::new(doc.recipes.clone()));
        let store = Arc::new(DocumentStore::new(dir.join("equipment.json"), doc.raw().clone(), Duration::ZERO));
        let timing = InterpreterTiming {
            premise_poll: Duration::from_millis(5),
            reply_poll: Duration::from_millis(5),
            event_grace: BTreeMap::from([("track_out_carrier".to_string(), Duration::from_millis(30))]),
        };
        let interpreter = CallBackInterpreter::new(
            plc.clone(),
            Arc::clone(&registry),
            dispatcher,
            Arc::clone(&recipes),
            Arc::clone(&store),
            timing,
        );
        Rig { plc, registry, recipes, store, interpreter, jobs, doc }
    }

    fn steps<'a>(rig: &'a Rig, signal: &str) -> &'a [CallBackStep] {
        &rig.doc.signal(signal).unwrap().call_back
    }

    #[test]
    fn test_read_then_write_reference() {
        let dir = tempfile::tempdir().unwrap();
        let rig = rig(dir.path());
        rig.plc.set("T2", 21.5);

        let report = rig
            .interpreter
            .execute("seq", steps(&rig, "seq"), &StopToken::new(), None)
            .unwrap();
        assert_eq!(report.steps, 2);
        assert_eq!(report.events, vec!["temp_read".to_string()]);
        assert_eq!(rig.plc.read_count("T2"), 1);
        assert_eq!(rig.plc.writes_to("T3"), vec![Value::Float(21.5)]);
        assert_eq!(rig.registry.get(VariableKind::Data, "temp").unwrap(), Value::Float(21.5));

        match rig.jobs.try_recv().unwrap() {
            DispatchJob::Event(event) => {
                assert_eq!(event.ceid, 100);
                assert_eq!(event.reports[0].values[0].value, Value::Float(21.5));
            }
            other => panic!("unexpected job {other:?}"),
        }
    }

    #[test]
    fn test_premise_matches_after_polls() {
        let dir = tempfile::tempdir().unwrap();
        let rig = rig(dir.path());
        rig.plc.script("P", [false, true]);
        let premise = steps(&rig, "gated")[0].premise().unwrap();
        let outcome = rig.interpreter.await_premise(&premise, &StopToken::new()).unwrap();
        assert_eq!(outcome, PremiseOutcome::Matched { reads: 2 });
    }

    #[test]
    fn test_premise_zero_timeout_reads_once() {
        let dir = tempfile::tempdir().unwrap();
        let rig = rig(dir.path());
        let mut premise = steps(&rig, "gated")[0].premise().unwrap();
        premise.timeout_secs = 0;
        let start = std::time::Instant::now();
        let outcome = rig.interpreter.await_premise(&premise, &StopToken::new()).unwrap();
        assert!(matches!(outcome, PremiseOutcome::TimedOut { reads: 1, .. }));
        assert!(start.elapsed() < Duration::from_millis(5));
    }

    #[test]
    fn test_premise_soft_timeout_still_reads() {
        let dir = tempfile::tempdir().unwrap();
        let rig = rig(dir.path());
        rig.plc.set("P", false);
        rig.plc.set("T2", 3.0);
        let stats = WorkerStats::new();

        let report = rig
            .interpreter
            .execute("gated", steps(&rig, "gated"), &StopToken::new(), Some(&stats))
            .unwrap();
        // One read per second of timeout.
        assert_eq!(rig.plc.read_count("P"), 2);
        assert_eq!(report.premise_timeouts, 1);
        assert_eq!(stats.premise_timeouts(), 1);
        assert_eq!(rig.plc.read_count("T2"), 1);
        assert_eq!(rig.registry.get(VariableKind::Data, "temp").unwrap(), Value::Float(3.0));
    }

    #[test]
    fn test_list_write_fans_out_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let rig = rig(dir.path());
        rig.interpreter
            .execute("fanout", steps(&rig, "fanout"), &StopToken::new(), None)
            .unwrap();
        let written: Vec<(String, Value)> = rig.plc.writes();
        assert_eq!(
            written,
            vec![
                ("Slot[1]".to_string(), Value::Int(4)),
                ("Slot[2]".to_string(), Value::Int(5)),
                ("Slot[3]".to_string(), Value::Int(6)),
            ]
        );
        assert!(rig.plc.writes_to("Slot").is_empty());
    }

    #[test]
    fn test_failure_aborts_remaining_steps() {
        let dir = tempfile::tempdir().unwrap();
        let rig = rig(dir.path());
        rig.plc.fail_writes("W2", true);
        let err = rig
            .interpreter
            .execute("broken", steps(&rig, "broken"), &StopToken::new(), None)
            .unwrap_err();
        match err {
            BridgeError::CallBackExecution { step, description, source, .. } => {
                assert_eq!(step, 2);
                assert_eq!(description, "second");
                assert!(matches!(*source, BridgeError::CommWrite(_)));
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(rig.plc.writes_to("W1"), vec![Value::Int(1)]);
        assert!(rig.plc.writes_to("W3").is_empty());
    }

    #[test]
    fn test_wait_reply_clears_flag() {
        let dir = tempfile::tempdir().unwrap();
        let rig = rig(dir.path());
        let registry = Arc::clone(&rig.registry);
        let setter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            registry.set(VariableKind::Data, "reply_flag", Value::Bool(true)).unwrap();
        });
        rig.interpreter
            .execute("reply", steps(&rig, "reply"), &StopToken::new(), None)
            .unwrap();
        setter.join().unwrap();
        assert_eq!(rig.registry.get(VariableKind::Data, "reply_flag").unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_wait_reply_cancelled_by_stop() {
        let dir = tempfile::tempdir().unwrap();
        let rig = rig(dir.path());
        let token = StopToken::new();
        let remote = token.clone();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.stop();
        });
        let result = rig.interpreter.execute("reply", steps(&rig, "reply"), &token, None);
        stopper.join().unwrap();
        assert!(matches!(result, Err(BridgeError::Cancelled)));
    }

    #[test]
    fn test_save_recipe_keeps_existing_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let rig = rig(dir.path());
        rig.registry.set(VariableKind::Data, "upload_recipe_id", Value::Int(5)).unwrap();
        rig.registry.set(VariableKind::Data, "upload_recipe_name", Value::from("new")).unwrap();
        rig.interpreter
            .execute("recipe", steps(&rig, "recipe"), &StopToken::new(), None)
            .unwrap();
        assert!(rig.recipes.contains("5_new"));
        assert!(rig.recipes.contains("5_old"));
        let on_disk: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(rig.store.path()).unwrap()).unwrap();
        assert!(on_disk["recipes"].get("5_new").is_some());
        assert!(on_disk["recipes"].get("5_old").is_some());
    }

    #[test]
    fn test_grace_period_delays_event() {
        let dir = tempfile::tempdir().unwrap();
        let rig = rig(dir.path());
        let start = std::time::Instant::now();
        let report = rig
            .interpreter
            .execute("late", steps(&rig, "late"), &StopToken::new(), None)
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(report.events, vec!["track_out_carrier".to_string()]);
        assert!(matches!(rig.jobs.try_recv(), Ok(DispatchJob::Event(e)) if e.ceid == 101));
    }
}
