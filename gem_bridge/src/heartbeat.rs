//! Heartbeat toggle.
//!
//! Alternates the `mes_heart` address between true and false so the
//! controller can tell the bridge is alive. A write failure with the link
//! down waits out the reconnect time and asks the controller to reconnect.

use crate::error::{BridgeError, BridgeResult};
use crate::registry::VariableRegistry;
use crate::stats::should_log_fault;
use crate::supervisor::WorkerContext;
use gem_common::consts::{DV_HEARTBEAT_GAP, DV_RECONNECT_WAIT, SV_PLC_CONNECTION_STATE};
use gem_common::controller::Controller;
use gem_common::equipment::{SignalDef, VariableKind};
use gem_common::value::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct Heartbeat {
    signal: SignalDef,
    controller: Arc<dyn Controller>,
    registry: Arc<VariableRegistry>,
    interval_secs: f64,
    reconnect_wait_secs: f64,
}

impl Heartbeat {
    pub fn new(
        signal: SignalDef,
        controller: Arc<dyn Controller>,
        registry: Arc<VariableRegistry>,
        interval_secs: f64,
        reconnect_wait_secs: f64,
    ) -> Self {
        Self {
            signal,
            controller,
            registry,
            interval_secs,
            reconnect_wait_secs,
        }
    }

    /// Gap between toggles; the data value wins over settings.
    pub fn gap(&self) -> Duration {
        secs(self.registry.get_f64_or(VariableKind::Data, DV_HEARTBEAT_GAP, self.interval_secs))
    }

    pub fn reconnect_wait(&self) -> Duration {
        secs(
            self.registry
                .get_f64_or(VariableKind::Data, DV_RECONNECT_WAIT, self.reconnect_wait_secs),
        )
    }

    fn publish_connection(&self, connected: bool) {
        if !self.registry.contains(VariableKind::Status, SV_PLC_CONNECTION_STATE) {
            return;
        }
        let changed = self
            .registry
            .get(VariableKind::Status, SV_PLC_CONNECTION_STATE)
            .map(|current| current.is_truthy() != connected)
            .unwrap_or(true);
        if changed {
            if let Err(e) = self
                .registry
                .set(VariableKind::Status, SV_PLC_CONNECTION_STATE, Value::Bool(connected))
            {
                warn!("Connection state update failed: {e}");
            }
        }
    }

    /// One toggle: write `level`, then wait.
    fn pulse(&self, level: bool, ctx: &WorkerContext) -> BridgeResult<()> {
        ctx.stats.record_poll();
        match self
            .controller
            .write(&self.signal.tag_name, self.signal.data_type, &Value::Bool(level))
        {
            Ok(()) => {
                ctx.stats.record_trigger();
                self.publish_connection(true);
                ctx.token.sleep(self.gap())
            }
            Err(e) => {
                let count = ctx.stats.record_fault(&e);
                if self.controller.is_connected() {
                    if should_log_fault(count) {
                        warn!(address = %self.signal.tag_name, "Heartbeat write failed ({count} total): {e}");
                    }
                    return ctx.token.sleep(self.gap());
                }
                self.publish_connection(false);
                let wait = self.reconnect_wait();
                if should_log_fault(count) {
                    warn!(wait_secs = wait.as_secs_f64(), "Controller disconnected, waiting to reconnect: {e}");
                }
                ctx.token.sleep(wait)?;
                match self.controller.connect() {
                    Ok(()) => info!("Controller reconnected"),
                    Err(e) => debug!("Reconnect failed: {e}"),
                }
                Ok(())
            }
        }
    }

    pub fn run(&self, ctx: &WorkerContext) {
        info!(address = %self.signal.tag_name, gap_secs = self.gap().as_secs_f64(), "Heartbeat running");
        loop {
            let result = self.pulse(true, ctx).and_then(|()| self.pulse(false, ctx));
            if let Err(BridgeError::Cancelled) = result {
                break;
            }
        }
        debug!("Heartbeat stopped");
    }
}

fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::simulation::SimulatedController;
    use crate::supervisor::WorkerPool;
    use gem_common::controller::ControllerFamily;
    use gem_common::equipment::EquipmentDocument;
    use std::thread;

    fn rig() -> (Arc<Heartbeat>, Arc<SimulatedController>, Arc<VariableRegistry>) {
        let doc: EquipmentDocument = r#"{
            "status_variable": {"plc_connection_state": {"svid": 1, "value_type": "BOOL", "value": false}},
            "data_values": {
                "mes_heart_time_gap": {"dvid": 10, "value_type": "F4", "value": 0.01},
                "reconnect_plc_wait_time": {"dvid": 11, "value_type": "F4", "value": 0.01}
            },
            "plc_signal_tag_name": {"mes_heart": {"tag_name": "Heart", "data_type": "bool"}}
        }"#
        .parse()
        .unwrap();
        let plc = Arc::new(SimulatedController::new(ControllerFamily::Tag));
        let registry = Arc::new(VariableRegistry::from_document(&doc).unwrap());
        let heartbeat = Heartbeat::new(
            doc.signal("mes_heart").cloned().unwrap(),
            plc.clone(),
            Arc::clone(&registry),
            1.0,
            5.0,
        );
        (Arc::new(heartbeat), plc, registry)
    }

    #[test]
    fn test_gap_prefers_data_value() {
        let (heartbeat, _, registry) = rig();
        assert!((heartbeat.gap().as_secs_f64() - 0.01).abs() < 1e-6);
        registry.set(VariableKind::Data, DV_HEARTBEAT_GAP, Value::Float(0.5)).unwrap();
        assert_eq!(heartbeat.gap(), Duration::from_millis(500));
        assert_eq!(secs(-1.0), Duration::ZERO);
    }

    #[test]
    fn test_toggles_true_then_false() {
        let (heartbeat, plc, registry) = rig();
        let pool = WorkerPool::new();
        let worker = Arc::clone(&heartbeat);
        pool.spawn("heartbeat", move |ctx| worker.run(&ctx)).unwrap();
        thread::sleep(Duration::from_millis(60));
        pool.stop("heartbeat");

        let writes = plc.writes_to("Heart");
        assert!(writes.len() >= 2);
        for (idx, value) in writes.iter().enumerate() {
            assert_eq!(*value, Value::Bool(idx % 2 == 0));
        }
        assert_eq!(
            registry.get(VariableKind::Status, SV_PLC_CONNECTION_STATE).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_disconnected_waits_and_reconnects() {
        let (heartbeat, plc, registry) = rig();
        plc.set_connected(false);
        let pool = WorkerPool::new();
        let worker = Arc::clone(&heartbeat);
        let stats = pool.spawn("heartbeat", move |ctx| worker.run(&ctx)).unwrap();
        thread::sleep(Duration::from_millis(50));
        pool.stop("heartbeat");

        assert!(plc.writes_to("Heart").is_empty());
        assert!(plc.connect_attempts() >= 1);
        assert!(stats.faults() >= 1);
        assert_eq!(
            registry.get(VariableKind::Status, SV_PLC_CONNECTION_STATE).unwrap(),
            Value::Bool(false)
        );
    }
}
