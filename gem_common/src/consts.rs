//! Well-known names and timing defaults for the bridge.
//!
//! Single source of truth for the names the standard watchers look up in the
//! equipment document. Imported by all crates.

use std::time::Duration;

// ─── Signals (`plc_signal_tag_name`) ────────────────────────────────

/// Boolean heartbeat address toggled by the bridge.
pub const SIGNAL_MES_HEART: &str = "mes_heart";
/// Control state (offline/local/remote) reported by the controller.
pub const SIGNAL_CONTROL_STATE: &str = "control_state";
/// Machine state (idle/run/alarm …) reported by the controller.
pub const SIGNAL_MACHINE_STATE: &str = "machine_state";
/// Alarm id published by the controller while in the alarm state.
pub const SIGNAL_ALARM_ID: &str = "alarm_id";
/// Recipe currently loaded on the controller.
pub const SIGNAL_CURRENT_RECIPE_NAME: &str = "current_recipe_name";

// ─── Status Variables ───────────────────────────────────────────────

pub const SV_CURRENT_CONTROL_STATE: &str = "current_control_state";
pub const SV_CURRENT_MACHINE_STATE: &str = "current_machine_state";
pub const SV_CURRENT_RECIPE_NAME: &str = "current_recipe_name";
/// Optional connectivity flag maintained by the heartbeat.
pub const SV_PLC_CONNECTION_STATE: &str = "plc_connection_state";

// ─── Data Values ────────────────────────────────────────────────────

/// Set by the host side when the awaited reply has arrived.
pub const DV_REPLY_FLAG: &str = "reply_flag";
pub const DV_UPLOAD_RECIPE_ID: &str = "upload_recipe_id";
pub const DV_UPLOAD_RECIPE_NAME: &str = "upload_recipe_name";
/// Machine-state value that means "alarm".
pub const DV_ALARM_STATE: &str = "alarm_state";
pub const DV_OCCUR_ALARM_CODE: &str = "occur_alarm_code";
pub const DV_CLEAR_ALARM_CODE: &str = "clear_alarm_code";
/// Seconds to wait before retrying a disconnected controller.
pub const DV_RECONNECT_WAIT: &str = "reconnect_plc_wait_time";
/// Heartbeat half-period in seconds.
pub const DV_HEARTBEAT_GAP: &str = "mes_heart_time_gap";

// ─── Collection Events ──────────────────────────────────────────────

pub const EVENT_CONTROL_STATE_CHANGE: &str = "control_state_change";
pub const EVENT_MACHINE_STATE_CHANGE: &str = "machine_state_change";

// ─── Alarms ─────────────────────────────────────────────────────────

/// Text reported when the controller raises an id missing from the alarm table.
pub const UNDEFINED_ALARM_TEXT: &str = "Occur Alarm, but alarm is not defined in alarm csv file.";
/// ALCD with the "alarm set" bit.
pub const DEFAULT_OCCUR_ALARM_CODE: i64 = 128;
pub const DEFAULT_CLEAR_ALARM_CODE: i64 = 0;

// ─── Timing Defaults ────────────────────────────────────────────────

/// Idle sleep between signal monitor polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);
/// Premise re-read interval (≈1 Hz).
pub const DEFAULT_PREMISE_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Sleep between reply-flag checks.
pub const DEFAULT_REPLY_POLL_INTERVAL: Duration = Duration::from_millis(200);
/// Premise timeout when a step does not set one.
pub const DEFAULT_PREMISE_TIMEOUT_SECS: u32 = 5;
pub const DEFAULT_RECONNECT_WAIT_SECS: f64 = 5.0;
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: f64 = 1.0;
pub const DEFAULT_PERSIST_DEBOUNCE_MS: u64 = 500;

/// Event that the host expects only after a grace period.
pub const EVENT_TRACK_OUT_CARRIER: &str = "track_out_carrier";
pub const TRACK_OUT_CARRIER_GRACE_SECS: f64 = 5.0;
