//! Signal monitors.
//!
//! One monitor per signal flagged `loop`. The monitor polls the signal's
//! address and runs its call-back list on every poll that reads the trigger
//! value. The controller holds a request until the call-back's handshake
//! clears it, so a list that failed part-way runs again on the next poll.
//! Read and call-back failures are counted and the loop resumes.

use crate::error::BridgeError;
use crate::interpreter::CallBackInterpreter;
use crate::stats::should_log_fault;
use crate::supervisor::WorkerContext;
use gem_common::controller::Controller;
use gem_common::equipment::SignalDef;
use gem_common::value::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct SignalMonitor {
    name: String,
    signal: SignalDef,
    trigger: Value,
    controller: Arc<dyn Controller>,
    interpreter: Arc<CallBackInterpreter>,
    poll_interval: Duration,
}

impl SignalMonitor {
    /// Returns `None` when the signal has no trigger value to watch for.
    pub fn new(
        name: impl Into<String>,
        signal: SignalDef,
        controller: Arc<dyn Controller>,
        interpreter: Arc<CallBackInterpreter>,
        poll_interval: Duration,
    ) -> Option<Self> {
        let trigger = signal.value.clone()?;
        Some(Self {
            name: name.into(),
            signal,
            trigger,
            controller,
            interpreter,
            poll_interval,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when `value` is the trigger value.
    pub fn is_triggered(&self, value: &Value) -> bool {
        value.loosely_eq(&self.trigger)
    }

    /// Worker body. Returns when the context is stopped.
    pub fn run(&self, ctx: &WorkerContext) {
        info!(
            signal = %self.name,
            address = %self.signal.tag_name,
            trigger = %self.trigger,
            steps = self.signal.call_back.len(),
            "Monitor running"
        );
        loop {
            ctx.stats.record_poll();
            match self.controller.read(&self.signal.tag_name, self.signal.data_type) {
                Ok(value) => {
                    if self.is_triggered(&value) {
                        ctx.stats.record_trigger();
                        debug!(signal = %self.name, value = %value, "Signal triggered");
                        match self.interpreter.execute(
                            &self.name,
                            &self.signal.call_back,
                            &ctx.token,
                            Some(&ctx.stats),
                        ) {
                            Ok(report) => debug!(signal = %self.name, steps = report.steps, "Call-back finished"),
                            Err(BridgeError::Cancelled) => break,
                            Err(e) => {
                                let count = ctx.stats.record_fault(&e);
                                if should_log_fault(count) {
                                    warn!(signal = %self.name, "Call-back failed ({count} total): {e}");
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    let count = ctx.stats.record_fault(&e);
                    if should_log_fault(count) {
                        warn!(signal = %self.name, "Signal read failed ({count} total): {e}");
                    }
                }
            }
            if ctx.token.sleep(self.poll_interval).is_err() {
                break;
            }
        }
        debug!(signal = %self.name, "Monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::EventDispatcher;
    use crate::drivers::simulation::SimulatedController;
    use crate::interpreter::InterpreterTiming;
    use crate::persistence::DocumentStore;
    use crate::recipe::RecipeRegistry;
    use crate::registry::VariableRegistry;
    use crate::supervisor::WorkerPool;
    use gem_common::controller::ControllerFamily;
    use gem_common::equipment::EquipmentDocument;
    use std::collections::BTreeMap;
    use std::thread;
    use std::time::Instant;

    const DOC: &str = r#"{
        "plc_signal_tag_name": {
            "request": {"tag_name": "Req", "data_type": "bool", "value": true, "loop": true, "call_back": [
                {"operation_type": "write", "tag_name": "Ack", "data_type": "bool", "value": true,
                 "description": "acknowledge request"},
                {"operation_type": "write", "tag_name": "Req", "data_type": "bool", "value": false,
                 "description": "clear request"}
            ]},
            "idle": {"tag_name": "Idle", "data_type": "bool", "loop": true}
        }
    }"#;

    struct Rig {
        plc: Arc<SimulatedController>,
        monitor: Arc<SignalMonitor>,
        doc: EquipmentDocument,
    }

    fn rig(dir: &std::path::Path) -> Rig {
        let doc: EquipmentDocument = DOC.parse().unwrap();
        let plc = Arc::new(SimulatedController::new(ControllerFamily::Tag));
        let registry = Arc::new(VariableRegistry::from_document(&doc).unwrap());
        let dispatcher = Arc::new(EventDispatcher::new(doc.collection_events.clone(), Arc::clone(&registry)));
        let store = Arc::new(DocumentStore::new(dir.join("equipment.json"), doc.raw().clone(), Duration::ZERO));
        let interpreter = Arc::new(CallBackInterpreter::new(
            plc.clone(),
            registry,
            dispatcher,
            Arc::new(RecipeRegistry::default()),
            store,
            InterpreterTiming {
                premise_poll: Duration::from_millis(1),
                reply_poll: Duration::from_millis(1),
                event_grace: BTreeMap::new(),
            },
        ));
        let monitor = SignalMonitor::new(
            "request",
            doc.signal("request").cloned().unwrap(),
            plc.clone(),
            interpreter,
            Duration::from_millis(1),
        )
        .unwrap();
        Rig {
            plc,
            monitor: Arc::new(monitor),
            doc,
        }
    }

    fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        done()
    }

    #[test]
    fn test_signal_without_trigger_value_has_no_monitor() {
        let dir = tempfile::tempdir().unwrap();
        let rig = rig(dir.path());
        let interpreter = Arc::clone(&rig.monitor.interpreter);
        let idle = rig.doc.signal("idle").cloned().unwrap();
        assert!(SignalMonitor::new("idle", idle, rig.plc.clone(), interpreter, Duration::from_millis(1)).is_none());
    }

    #[test]
    fn test_trigger_matches_loosely() {
        let dir = tempfile::tempdir().unwrap();
        let rig = rig(dir.path());
        assert!(rig.monitor.is_triggered(&Value::Bool(true)));
        assert!(rig.monitor.is_triggered(&Value::Int(1)));
        assert!(!rig.monitor.is_triggered(&Value::Int(0)));
    }

    #[test]
    fn test_held_request_retried_after_transient_write_fault() {
        let dir = tempfile::tempdir().unwrap();
        let rig = rig(dir.path());
        rig.plc.fail_writes("Ack", true);
        rig.plc.set("Req", true);

        let pool = WorkerPool::new();
        let monitor = Arc::clone(&rig.monitor);
        let stats = pool.spawn("signal:request", move |ctx| monitor.run(&ctx)).unwrap();
        assert!(wait_until(Duration::from_secs(2), || stats.faults() >= 2));
        assert!(rig.plc.writes_to("Ack").is_empty());

        rig.plc.fail_writes("Ack", false);
        assert!(wait_until(Duration::from_secs(2), || rig.plc.writes_to("Ack").len() == 1));
        assert!(wait_until(Duration::from_secs(2), || rig.plc.value("Req") == Some(Value::Bool(false))));
        thread::sleep(Duration::from_millis(20));
        pool.stop("signal:request");

        // The handshake cleared the request, so the list ran to completion once.
        assert_eq!(rig.plc.writes_to("Ack"), vec![Value::Bool(true)]);
        assert!(stats.triggers() >= 3);
    }

    #[test]
    fn test_request_runs_on_every_matching_poll() {
        let dir = tempfile::tempdir().unwrap();
        let rig = rig(dir.path());
        // The controller raises the request again before the monitor reads low.
        rig.plc.script("Req", [true, true, true]);

        let pool = WorkerPool::new();
        let monitor = Arc::clone(&rig.monitor);
        let stats = pool.spawn("signal:request", move |ctx| monitor.run(&ctx)).unwrap();
        assert!(wait_until(Duration::from_secs(2), || rig.plc.writes_to("Ack").len() >= 3));
        pool.stop("signal:request");
        assert!(stats.triggers() >= 3);
    }
}
