//! Supervised worker pool.
//!
//! Every long-lived loop of the engine (heartbeat, state watchers, signal
//! monitors, dispatcher, persistence) runs as a named worker thread carrying
//! its own [`StopToken`]. Workers sleep through the token, so a stop request
//! interrupts any pending wait and the worker can be joined promptly.

use crate::error::{BridgeError, BridgeResult};
use crate::stats::{WorkerStats, WorkerStatsSnapshot};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

#[derive(Debug, Default)]
struct StopState {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Cancellation token shared between a worker and its supervisor.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    state: Arc<StopState>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop and wake any pending sleep.
    pub fn stop(&self) {
        *self.state.stopped.lock() = true;
        self.state.wake.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.state.stopped.lock()
    }

    /// Sleep for `duration` unless stopped first.
    ///
    /// # Errors
    /// `BridgeError::Cancelled` if the token is (or becomes) stopped.
    pub fn sleep(&self, duration: Duration) -> BridgeResult<()> {
        let deadline = Instant::now() + duration;
        let mut stopped = self.state.stopped.lock();
        while !*stopped {
            if self.state.wake.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        if *stopped {
            Err(BridgeError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Handed to the worker body.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub name: String,
    pub token: StopToken,
    pub stats: Arc<WorkerStats>,
}

struct Worker {
    token: StopToken,
    stats: Arc<WorkerStats>,
    handle: JoinHandle<()>,
}

/// Diagnostics view of one worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    pub name: String,
    pub running: bool,
    pub stats: WorkerStatsSnapshot,
}

/// Named worker threads, each stoppable on its own.
#[derive(Default)]
pub struct WorkerPool {
    workers: Mutex<BTreeMap<String, Worker>>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `body` on a new thread named `name`.
    ///
    /// # Errors
    /// `BridgeError::Worker` if the name is taken or the thread cannot start.
    pub fn spawn<F>(&self, name: impl Into<String>, body: F) -> BridgeResult<Arc<WorkerStats>>
    where
        F: FnOnce(WorkerContext) + Send + 'static,
    {
        let name = name.into();
        let mut workers = self.workers.lock();
        if workers.contains_key(&name) {
            return Err(BridgeError::Worker {
                name,
                reason: "a worker with this name is already running".to_string(),
            });
        }

        let ctx = WorkerContext {
            name: name.clone(),
            token: StopToken::new(),
            stats: Arc::new(WorkerStats::new()),
        };
        let token = ctx.token.clone();
        let stats = Arc::clone(&ctx.stats);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || body(ctx))
            .map_err(|e| BridgeError::Worker {
                name: name.clone(),
                reason: e.to_string(),
            })?;

        debug!(worker = %name, "Worker started");
        workers.insert(
            name,
            Worker {
                token,
                stats: Arc::clone(&stats),
                handle,
            },
        );
        Ok(stats)
    }

    /// Stop and join one worker. Returns `false` if no such worker exists.
    pub fn stop(&self, name: &str) -> bool {
        let Some(worker) = self.workers.lock().remove(name) else {
            return false;
        };
        worker.token.stop();
        join_worker(name, worker.handle);
        true
    }

    /// Stop every worker, then join them all.
    pub fn stop_all(&self) {
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers.values() {
            worker.token.stop();
        }
        let count = workers.len();
        for (name, worker) in workers {
            join_worker(&name, worker.handle);
        }
        info!("Stopped {count} workers");
    }

    /// Stop and join workers whose name matches `filter`, in name order.
    pub fn stop_matching(&self, filter: impl Fn(&str) -> bool) -> usize {
        let names: Vec<String> = self
            .workers
            .lock()
            .keys()
            .filter(|name| filter(name))
            .cloned()
            .collect();
        names.iter().filter(|name| self.stop(name)).count()
    }

    pub fn names(&self) -> Vec<String> {
        self.workers.lock().keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workers.lock().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.workers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.lock().is_empty()
    }

    pub fn stats(&self, name: &str) -> Option<Arc<WorkerStats>> {
        self.workers.lock().get(name).map(|w| Arc::clone(&w.stats))
    }

    pub fn snapshot(&self) -> Vec<WorkerSnapshot> {
        self.workers
            .lock()
            .iter()
            .map(|(name, worker)| WorkerSnapshot {
                name: name.clone(),
                running: !worker.handle.is_finished(),
                stats: worker.stats.snapshot(),
            })
            .collect()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.workers.get_mut().is_empty() {
            self.stop_all();
        }
    }
}

fn join_worker(name: &str, handle: JoinHandle<()>) {
    if handle.join().is_err() {
        error!(worker = %name, "Worker panicked");
    } else {
        debug!(worker = %name, "Worker stopped");
    }
}
