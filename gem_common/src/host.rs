//! Host-protocol collaborator.
//!
//! The bridge never encodes SECS messages itself. It assembles typed reports
//! and hands them to a [`HostProtocol`] implementation, which owns the host
//! session (connection handshake, framing, S6F11/S5F1 encoding).

use crate::value::ReportValue;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error types returned by the host session.
#[derive(Debug, Clone, Error)]
pub enum HostError {
    #[error("Host session not connected")]
    NotConnected,

    /// The host answered with a negative acknowledgement
    #[error("Host rejected message: {0}")]
    Rejected(String),

    #[error("Host transport error: {0}")]
    Transport(String),
}

/// One report of a collection event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub report_id: u32,
    pub values: Vec<ReportValue>,
}

/// Collection event report (S6F11 payload).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventReport {
    pub event_name: String,
    pub ceid: u32,
    pub reports: Vec<Report>,
}

/// Alarm report (S5F1 payload).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmReport {
    /// ALCD
    pub alarm_code: i64,
    /// ALID
    pub alarm_id: u32,
    /// ALTX
    pub alarm_text: String,
    /// `true` for set, `false` for clear.
    pub occurred: bool,
}

/// Outbound half of the host session.
///
/// Called from the dispatcher worker only, never from a poll loop.
pub trait HostProtocol: Send + Sync {
    fn send_event_report(&self, report: &EventReport) -> Result<(), HostError>;

    fn send_alarm_report(&self, report: &AlarmReport) -> Result<(), HostError>;
}
