//! Control/machine state watchers.
//!
//! Both watchers read an integer state from the controller, mirror changes
//! into a status variable and report a collection event. The machine-state
//! watcher also drives the alarm lifecycle: entering the alarm state raises
//! an alarm, leaving it clears the last one raised.
//!
//! # Module Structure
//!
//! - [`StateTracker`]: the pure change-detection step shared by both watchers
//! - [`ControlStateWatcher`], [`MachineStateWatcher`]: worker bodies

use crate::alarm::AlarmLifecycle;
use crate::dispatcher::EventDispatcher;
use crate::error::BridgeResult;
use crate::registry::VariableRegistry;
use crate::stats::should_log_fault;
use crate::supervisor::WorkerContext;
use gem_common::consts::{
    DV_ALARM_STATE, DV_RECONNECT_WAIT, EVENT_CONTROL_STATE_CHANGE, EVENT_MACHINE_STATE_CHANGE,
    SV_CURRENT_CONTROL_STATE, SV_CURRENT_MACHINE_STATE,
};
use gem_common::controller::Controller;
use gem_common::equipment::{SignalDef, VariableKind};
use gem_common::value::{DataType, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// A state change observed by a tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub previous: Value,
    pub current: Value,
}

/// Compares controller readings against a status variable.
pub struct StateTracker {
    registry: Arc<VariableRegistry>,
    sv_name: &'static str,
}

impl StateTracker {
    pub fn new(registry: Arc<VariableRegistry>, sv_name: &'static str) -> Self {
        Self { registry, sv_name }
    }

    /// Store `reading` if it differs from the status variable.
    ///
    /// Repeating the same reading yields `None`.
    pub fn update(&self, reading: Value) -> BridgeResult<Option<StateChange>> {
        let previous = self.registry.get(VariableKind::Status, self.sv_name)?;
        if previous.loosely_eq(&reading) {
            return Ok(None);
        }
        let current = self.registry.set(VariableKind::Status, self.sv_name, reading)?;
        Ok(Some(StateChange { previous, current }))
    }
}

/// Shared plumbing of both watchers.
struct StateLoop {
    label: &'static str,
    signal: SignalDef,
    controller: Arc<dyn Controller>,
    registry: Arc<VariableRegistry>,
    poll_interval: Duration,
    reconnect_wait_secs: f64,
}

impl StateLoop {
    fn reconnect_wait(&self) -> Duration {
        let secs = self
            .registry
            .get_f64_or(VariableKind::Data, DV_RECONNECT_WAIT, self.reconnect_wait_secs);
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Poll until stopped, calling `on_reading` for each successful read.
    fn run(&self, ctx: &WorkerContext, mut on_reading: impl FnMut(Value) -> BridgeResult<()>) {
        info!(watcher = self.label, address = %self.signal.tag_name, "State watcher running");
        loop {
            ctx.stats.record_poll();
            let pause = match self.controller.read(&self.signal.tag_name, DataType::Int) {
                Ok(value) => {
                    if let Err(e) = on_reading(value) {
                        let count = ctx.stats.record_fault(&e);
                        if should_log_fault(count) {
                            error!(watcher = self.label, "State update failed ({count} total): {e}");
                        }
                    }
                    self.poll_interval
                }
                Err(e) => {
                    let count = ctx.stats.record_fault(&e);
                    let wait = self.reconnect_wait();
                    if should_log_fault(count) {
                        warn!(
                            watcher = self.label,
                            wait_secs = wait.as_secs_f64(),
                            "State read failed ({count} total), backing off: {e}"
                        );
                    }
                    wait
                }
            };
            if ctx.token.sleep(pause).is_err() {
                break;
            }
        }
        debug!(watcher = self.label, "State watcher stopped");
    }
}

pub struct ControlStateWatcher {
    inner: StateLoop,
    tracker: StateTracker,
    dispatcher: Arc<EventDispatcher>,
}

impl ControlStateWatcher {
    pub fn new(
        signal: SignalDef,
        controller: Arc<dyn Controller>,
        registry: Arc<VariableRegistry>,
        dispatcher: Arc<EventDispatcher>,
        poll_interval: Duration,
        reconnect_wait_secs: f64,
    ) -> Self {
        Self {
            tracker: StateTracker::new(Arc::clone(&registry), SV_CURRENT_CONTROL_STATE),
            inner: StateLoop {
                label: "control_state",
                signal,
                controller,
                registry,
                poll_interval,
                reconnect_wait_secs,
            },
            dispatcher,
        }
    }

    /// Apply one reading.
    pub fn apply(&self, reading: Value) -> BridgeResult<Option<StateChange>> {
        let change = self.tracker.update(reading)?;
        if let Some(change) = &change {
            info!(previous = %change.previous, current = %change.current, "Control state changed");
            self.dispatcher.send_event(EVENT_CONTROL_STATE_CHANGE);
        }
        Ok(change)
    }

    pub fn run(&self, ctx: &WorkerContext) {
        self.inner.run(ctx, |value| self.apply(value).map(|_| ()));
    }
}

pub struct MachineStateWatcher {
    inner: StateLoop,
    tracker: StateTracker,
    dispatcher: Arc<EventDispatcher>,
    alarms: Arc<AlarmLifecycle>,
}

impl MachineStateWatcher {
    pub fn new(
        signal: SignalDef,
        controller: Arc<dyn Controller>,
        registry: Arc<VariableRegistry>,
        dispatcher: Arc<EventDispatcher>,
        alarms: Arc<AlarmLifecycle>,
        poll_interval: Duration,
        reconnect_wait_secs: f64,
    ) -> Self {
        Self {
            tracker: StateTracker::new(Arc::clone(&registry), SV_CURRENT_MACHINE_STATE),
            inner: StateLoop {
                label: "machine_state",
                signal,
                controller,
                registry,
                poll_interval,
                reconnect_wait_secs,
            },
            dispatcher,
            alarms,
        }
    }

    /// Apply one reading, raising or clearing alarms around the alarm state.
    pub fn apply(&self, reading: Value) -> BridgeResult<Option<StateChange>> {
        let previous = self.inner.registry.get(VariableKind::Status, SV_CURRENT_MACHINE_STATE)?;
        if previous.loosely_eq(&reading) {
            return Ok(None);
        }
        let alarm_state = self.inner.registry.get(VariableKind::Data, DV_ALARM_STATE)?;
        if reading.loosely_eq(&alarm_state) {
            if let Err(e) = self.alarms.occur() {
                error!("Alarm id read failed: {e}");
            }
        } else if previous.loosely_eq(&alarm_state) {
            self.alarms.clear();
        }
        let change = self.tracker.update(reading)?;
        if let Some(change) = &change {
            info!(previous = %change.previous, current = %change.current, "Machine state changed");
            self.dispatcher.send_event(EVENT_MACHINE_STATE_CHANGE);
        }
        Ok(change)
    }

    pub fn run(&self, ctx: &WorkerContext) {
        self.inner.run(ctx, |value| self.apply(value).map(|_| ()));
    }
}
