//! Per-worker statistics.
//!
//! Every supervised worker owns a [`WorkerStats`]. Poll loops swallow
//! transient controller faults; this is where those faults become visible.

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Counters updated by a single worker and read by diagnostics.
#[derive(Debug, Default)]
pub struct WorkerStats {
    polls: AtomicU64,
    triggers: AtomicU64,
    faults: AtomicU64,
    premise_timeouts: AtomicU64,
    last_fault: Mutex<Option<FaultRecord>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaultRecord {
    pub message: String,
    /// Unix epoch seconds
    pub at: u64,
}

/// Serializable copy of [`WorkerStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerStatsSnapshot {
    pub polls: u64,
    pub triggers: u64,
    pub faults: u64,
    pub premise_timeouts: u64,
    pub last_fault: Option<FaultRecord>,
}

impl WorkerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_poll(&self) {
        self.polls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_trigger(&self) {
        self.triggers.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a fault and remember its text. Returns the new fault count.
    pub fn record_fault(&self, fault: &dyn Display) -> u64 {
        *self.last_fault.lock() = Some(FaultRecord {
            message: fault.to_string(),
            at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        });
        self.faults.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_premise_timeout(&self) {
        self.premise_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn faults(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }

    pub fn triggers(&self) -> u64 {
        self.triggers.load(Ordering::Relaxed)
    }

    pub fn premise_timeouts(&self) -> u64 {
        self.premise_timeouts.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            polls: self.polls.load(Ordering::Relaxed),
            triggers: self.triggers(),
            faults: self.faults(),
            premise_timeouts: self.premise_timeouts(),
            last_fault: self.last_fault.lock().clone(),
        }
    }
}

/// Log the first ten faults, then every thousandth.
pub fn should_log_fault(count: u64) -> bool {
    count <= 10 || count % 1000 == 0
}
