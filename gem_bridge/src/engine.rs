//! Engine assembly.
//!
//! Wires the equipment document, controller, registries and host session into
//! the supervised worker set:
//!
//! | Worker           | Runs when                                  |
//! |------------------|--------------------------------------------|
//! | `dispatcher`     | always                                     |
//! | `persistence`    | `persist_debounce_ms > 0`                  |
//! | `heartbeat`      | signal `mes_heart` is declared             |
//! | `control_state`  | signal `control_state` is declared         |
//! | `machine_state`  | signal `machine_state` is declared         |
//! | `signal:<name>`  | one per signal flagged `loop`              |

use crate::alarm::{AlarmLifecycle, AlarmTable};
use crate::dispatcher::{self, EventDispatcher};
use crate::driver_registry::ControllerRegistry;
use crate::error::{BridgeError, BridgeResult};
use crate::heartbeat::Heartbeat;
use crate::interpreter::{CallBackInterpreter, InterpreterTiming};
use crate::monitor::SignalMonitor;
use crate::persistence::DocumentStore;
use crate::recipe::RecipeRegistry;
use crate::registry::{VariableEntry, VariableRegistry};
use crate::requests::{ClockSetter, HostRequestHandler, SystemClock};
use crate::state_watch::{ControlStateWatcher, MachineStateWatcher};
use crate::supervisor::{WorkerPool, WorkerSnapshot};
use gem_common::config::BridgeConfig;
use gem_common::consts::{SIGNAL_ALARM_ID, SIGNAL_CONTROL_STATE, SIGNAL_CURRENT_RECIPE_NAME, SIGNAL_MACHINE_STATE, SIGNAL_MES_HEART};
use gem_common::controller::Controller;
use gem_common::equipment::{EquipmentDocument, VariableKind};
use gem_common::host::HostProtocol;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

const DISPATCHER_WORKER: &str = "dispatcher";
const PERSISTENCE_WORKER: &str = "persistence";
const HEARTBEAT_WORKER: &str = "heartbeat";

/// Serializable engine state for the CLI and logs.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub controller: &'static str,
    pub controller_connected: bool,
    pub workers: Vec<WorkerSnapshot>,
    pub status_variables: Vec<VariableEntry>,
    pub data_values: Vec<VariableEntry>,
    pub equipment_constants: Vec<VariableEntry>,
    pub recipes: Vec<String>,
    pub active_alarm: Option<u32>,
}

pub struct Engine {
    config: BridgeConfig,
    doc: EquipmentDocument,
    controller: Arc<dyn Controller>,
    host: Arc<dyn HostProtocol>,
    registry: Arc<VariableRegistry>,
    dispatcher: Arc<EventDispatcher>,
    recipes: Arc<RecipeRegistry>,
    store: Arc<DocumentStore>,
    alarms: Arc<AlarmLifecycle>,
    interpreter: Arc<CallBackInterpreter>,
    requests: Arc<HostRequestHandler>,
    pool: WorkerPool,
}

impl Engine {
    /// Load both documents named by `config` and create the controller.
    ///
    /// # Errors
    /// Configuration and validation errors abort before anything runs.
    pub fn from_config(config: BridgeConfig, host: Arc<dyn HostProtocol>) -> BridgeResult<Self> {
        let doc = EquipmentDocument::load(&config.equipment.document)?;
        let table = match &config.equipment.alarm_table {
            Some(path) => AlarmTable::load(path)?,
            None => {
                warn!("No alarm table configured, alarms will use the undefined text");
                AlarmTable::default()
            }
        };
        let controller = ControllerRegistry::with_builtin().create(&config.controller)?;
        if let Err(e) = controller.connect() {
            warn!("Controller not reachable yet, watchers will retry: {e}");
        }
        Self::new(config, doc, table, controller, host)
    }

    pub fn new(
        config: BridgeConfig,
        doc: EquipmentDocument,
        table: AlarmTable,
        controller: Arc<dyn Controller>,
        host: Arc<dyn HostProtocol>,
    ) -> BridgeResult<Self> {
        Self::with_clock(config, doc, table, controller, host, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: BridgeConfig,
        doc: EquipmentDocument,
        table: AlarmTable,
        controller: Arc<dyn Controller>,
        host: Arc<dyn HostProtocol>,
        clock: Arc<dyn ClockSetter>,
    ) -> BridgeResult<Self> {
        config.validate()?;
        doc.validate()?;

        let registry = Arc::new(VariableRegistry::from_document(&doc)?);
        let dispatcher = Arc::new(EventDispatcher::new(
            doc.collection_events.clone(),
            Arc::clone(&registry),
        ));
        let recipes = Arc::new(RecipeRegistry::new(doc.recipes.clone()));
        let store = Arc::new(DocumentStore::new(
            &config.equipment.document,
            doc.raw().clone(),
            config.engine.persist_debounce(),
        ));
        let alarms = Arc::new(AlarmLifecycle::new(
            Arc::new(table),
            Arc::clone(&controller),
            Arc::clone(&registry),
            Arc::clone(&dispatcher),
            doc.signal(SIGNAL_ALARM_ID).cloned(),
        ));
        let interpreter = Arc::new(CallBackInterpreter::new(
            Arc::clone(&controller),
            Arc::clone(&registry),
            Arc::clone(&dispatcher),
            Arc::clone(&recipes),
            Arc::clone(&store),
            InterpreterTiming::from_settings(&config.engine),
        ));
        let requests = Arc::new(HostRequestHandler::new(
            Arc::clone(&controller),
            Arc::clone(&registry),
            Arc::clone(&recipes),
            Arc::clone(&store),
            Arc::clone(&dispatcher),
            doc.remote_commands.clone(),
            doc.signal(SIGNAL_CURRENT_RECIPE_NAME).cloned(),
            clock,
        ));

        info!(
            service = %config.shared.service_name,
            status_variables = registry.len(VariableKind::Status),
            data_values = registry.len(VariableKind::Data),
            equipment_constants = registry.len(VariableKind::Constant),
            signals = doc.signals.len(),
            "Engine assembled"
        );

        Ok(Self {
            config,
            doc,
            controller,
            host,
            registry,
            dispatcher,
            recipes,
            store,
            alarms,
            interpreter,
            requests,
            pool: WorkerPool::new(),
        })
    }

    /// Start every configured worker.
    ///
    /// # Errors
    /// `BridgeError::Worker` if the engine was already started or a thread
    /// cannot be spawned. Workers started before the failure keep running
    /// until [`Engine::stop`].
    pub fn start(&self) -> BridgeResult<()> {
        let receiver = self.dispatcher.take_receiver().ok_or_else(|| BridgeError::Worker {
            name: DISPATCHER_WORKER.to_string(),
            reason: "engine already started".to_string(),
        })?;
        let host = Arc::clone(&self.host);
        self.pool
            .spawn(DISPATCHER_WORKER, move |ctx| dispatcher::run(receiver, host, &ctx))?;

        if !self.store.debounce().is_zero() {
            let store = Arc::clone(&self.store);
            self.pool.spawn(PERSISTENCE_WORKER, move |ctx| store.run(&ctx))?;
        }

        let settings = &self.config.engine;
        if let Some(signal) = self.doc.signal(SIGNAL_MES_HEART) {
            let heartbeat = Heartbeat::new(
                signal.clone(),
                Arc::clone(&self.controller),
                Arc::clone(&self.registry),
                settings.heartbeat_interval_secs,
                settings.reconnect_wait_secs,
            );
            self.pool.spawn(HEARTBEAT_WORKER, move |ctx| heartbeat.run(&ctx))?;
        }

        if let Some(signal) = self.doc.signal(SIGNAL_CONTROL_STATE) {
            let watcher = ControlStateWatcher::new(
                signal.clone(),
                Arc::clone(&self.controller),
                Arc::clone(&self.registry),
                Arc::clone(&self.dispatcher),
                settings.poll_interval(),
                settings.reconnect_wait_secs,
            );
            self.pool.spawn(SIGNAL_CONTROL_STATE, move |ctx| watcher.run(&ctx))?;
        }

        if let Some(signal) = self.doc.signal(SIGNAL_MACHINE_STATE) {
            let watcher = MachineStateWatcher::new(
                signal.clone(),
                Arc::clone(&self.controller),
                Arc::clone(&self.registry),
                Arc::clone(&self.dispatcher),
                Arc::clone(&self.alarms),
                settings.poll_interval(),
                settings.reconnect_wait_secs,
            );
            self.pool.spawn(SIGNAL_MACHINE_STATE, move |ctx| watcher.run(&ctx))?;
        }

        for (name, signal) in self.doc.signals.iter().filter(|(_, s)| s.looping) {
            let Some(monitor) = SignalMonitor::new(
                name.clone(),
                signal.clone(),
                Arc::clone(&self.controller),
                Arc::clone(&self.interpreter),
                settings.poll_interval(),
            ) else {
                warn!(signal = %name, "Loop signal has no trigger value, not monitored");
                continue;
            };
            self.pool.spawn(format!("signal:{name}"), move |ctx| monitor.run(&ctx))?;
        }

        info!(workers = self.pool.len(), "Engine started");
        Ok(())
    }

    /// Stop the watchers, drain the dispatcher, then flush the document.
    pub fn stop(&self) -> BridgeResult<()> {
        let stopped = self.pool.stop_matching(|name| name != DISPATCHER_WORKER);
        self.pool.stop(DISPATCHER_WORKER);
        self.store.flush()?;
        info!(workers = stopped + 1, "Engine stopped");
        Ok(())
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            controller: self.controller.name(),
            controller_connected: self.controller.is_connected(),
            workers: self.pool.snapshot(),
            status_variables: self.registry.snapshot(VariableKind::Status),
            data_values: self.registry.snapshot(VariableKind::Data),
            equipment_constants: self.registry.snapshot(VariableKind::Constant),
            recipes: self.recipes.names(),
            active_alarm: self.alarms.active_alarm(),
        }
    }

    pub fn registry(&self) -> &Arc<VariableRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn interpreter(&self) -> &Arc<CallBackInterpreter> {
        &self.interpreter
    }

    pub fn requests(&self) -> &Arc<HostRequestHandler> {
        &self.requests
    }

    pub fn controller(&self) -> &Arc<dyn Controller> {
        &self.controller
    }

    pub fn document(&self) -> &EquipmentDocument {
        &self.doc
    }

    pub fn worker_names(&self) -> Vec<String> {
        self.pool.names()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if !self.pool.is_empty() {
            if let Err(e) = self.stop() {
                warn!("Engine shutdown flush failed: {e}");
            }
        }
    }
}
