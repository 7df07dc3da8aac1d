//! Inbound host requests.
//!
//! The host session calls into the engine synchronously for status variable
//! values, the equipment clock, the recipe list and remote commands.

use crate::dispatcher::EventDispatcher;
use crate::error::{BridgeError, BridgeResult};
use crate::persistence::DocumentStore;
use crate::recipe::RecipeRegistry;
use crate::registry::VariableRegistry;
use chrono::{Local, NaiveDateTime, Timelike};
use gem_common::consts::SV_CURRENT_RECIPE_NAME;
use gem_common::controller::Controller;
use gem_common::equipment::{RemoteCommandDef, SignalDef, VariableKind};
use gem_common::value::{DataType, ReportValue};
use std::collections::BTreeMap;
use std::process::Command;
use std::sync::Arc;
use tracing::{info, warn};

const CLOCK_FORMAT: &str = "%Y%m%d%H%M%S";

/// Reply to a host clock change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeAck {
    Ack,
    Nack,
}

/// Applies a new wall-clock time to the equipment.
pub trait ClockSetter: Send + Sync {
    fn set_time(&self, at: NaiveDateTime) -> Result<(), String>;
}

/// Sets the host OS clock through `date`.
#[derive(Debug, Default)]
pub struct SystemClock;

impl ClockSetter for SystemClock {
    fn set_time(&self, at: NaiveDateTime) -> Result<(), String> {
        let status = Command::new("date")
            .arg("-s")
            .arg(at.format("%Y-%m-%d %H:%M:%S").to_string())
            .status()
            .map_err(|e| e.to_string())?;
        if status.success() {
            Ok(())
        } else {
            Err(format!("date exited with {status}"))
        }
    }
}

/// Equipment clock as `YYYYMMDDhhmmsscc` (cc = hundredths of a second).
pub fn format_clock(at: NaiveDateTime) -> String {
    format!("{}{:02}", at.format(CLOCK_FORMAT), at.nanosecond() / 10_000_000 % 100)
}

/// Parse a 14 or 16 digit host clock string.
pub fn parse_clock(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if !matches!(text.len(), 14 | 16) || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let at = NaiveDateTime::parse_from_str(&text[..14], CLOCK_FORMAT).ok()?;
    match text.get(14..) {
        Some(cc) if !cc.is_empty() => {
            let hundredths: u32 = cc.parse().ok()?;
            at.with_nanosecond(hundredths * 10_000_000)
        }
        _ => Some(at),
    }
}

pub struct HostRequestHandler {
    controller: Arc<dyn Controller>,
    registry: Arc<VariableRegistry>,
    recipes: Arc<RecipeRegistry>,
    store: Arc<DocumentStore>,
    dispatcher: Arc<EventDispatcher>,
    remote_commands: BTreeMap<String, RemoteCommandDef>,
    recipe_signal: Option<SignalDef>,
    clock: Arc<dyn ClockSetter>,
}

impl HostRequestHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        controller: Arc<dyn Controller>,
        registry: Arc<VariableRegistry>,
        recipes: Arc<RecipeRegistry>,
        store: Arc<DocumentStore>,
        dispatcher: Arc<EventDispatcher>,
        remote_commands: BTreeMap<String, RemoteCommandDef>,
        recipe_signal: Option<SignalDef>,
        clock: Arc<dyn ClockSetter>,
    ) -> Self {
        Self {
            controller,
            registry,
            recipes,
            store,
            dispatcher,
            remote_commands,
            recipe_signal,
            clock,
        }
    }

    /// Current value of status variable `svid`, typed for the host.
    pub fn on_status_variable_request(&self, svid: u32) -> Option<ReportValue> {
        let entry = self.registry.entry_by_id(VariableKind::Status, svid)?;
        if entry.name == SV_CURRENT_RECIPE_NAME {
            if let Err(e) = self.refresh_recipe_name() {
                warn!(svid, "Recipe name refresh failed: {e}");
            }
        }
        self.registry
            .entry_by_id(VariableKind::Status, svid)
            .map(|entry| entry.report_value())
    }

    fn refresh_recipe_name(&self) -> BridgeResult<()> {
        let Some(signal) = &self.recipe_signal else {
            return Ok(());
        };
        let name = self
            .controller
            .read(&signal.tag_name, DataType::String)
            .map_err(BridgeError::CommRead)?;
        let stored = self.registry.set(VariableKind::Status, SV_CURRENT_RECIPE_NAME, name)?;
        self.store.set_status_value(SV_CURRENT_RECIPE_NAME, &stored)?;
        info!(recipe = %stored, "Current recipe name refreshed");
        Ok(())
    }

    pub fn on_date_time_request(&self) -> String {
        format_clock(Local::now().naive_local())
    }

    pub fn on_date_time_set(&self, text: &str) -> TimeAck {
        let Some(at) = parse_clock(text) else {
            warn!(requested = text, "Clock change rejected: expected 14 or 16 digits");
            return TimeAck::Nack;
        };
        info!(current = %self.on_date_time_request(), requested = text, "Setting equipment clock");
        match self.clock.set_time(at) {
            Ok(()) => {
                info!(current = %self.on_date_time_request(), "Equipment clock set");
                TimeAck::Ack
            }
            Err(e) => {
                warn!(current = %self.on_date_time_request(), "Clock change failed: {e}");
                TimeAck::Nack
            }
        }
    }

    pub fn on_recipe_list_request(&self) -> Vec<String> {
        self.recipes.names()
    }

    /// Accept a known remote command and report its completion event.
    pub fn on_remote_command(&self, name: &str) -> bool {
        let Some(command) = self.remote_commands.get(name) else {
            warn!(command = name, "Unknown remote command");
            return false;
        };
        info!(command = name, ce_id = command.ce_id, "Remote command accepted");
        match self.dispatcher.event_name(command.ce_id) {
            Some(event) => {
                let event = event.to_string();
                self.dispatcher.send_event(&event)
            }
            None => false,
        }
    }
}
