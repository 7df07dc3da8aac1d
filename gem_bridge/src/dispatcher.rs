//! Event dispatcher.
//!
//! `send_event` assembles the report snapshot on the calling thread (each
//! variable is read under its table lock, so no single value is torn) and
//! queues it. A single dispatcher worker drains the queue and hands each
//! payload to the [`HostProtocol`], so reports reach the host in the order
//! they were queued and no poll loop ever waits on the host.

use crate::registry::VariableRegistry;
use crate::stats::should_log_fault;
use crate::supervisor::WorkerContext;
use gem_common::equipment::CollectionEventDef;
use gem_common::host::{AlarmReport, EventReport, HostProtocol, Report};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Queue check interval while idle.
const RECV_POLL: Duration = Duration::from_millis(50);

/// A unit of work for the host session.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchJob {
    Event(EventReport),
    Alarm(AlarmReport),
}

pub struct EventDispatcher {
    events: BTreeMap<String, CollectionEventDef>,
    registry: Arc<VariableRegistry>,
    sender: Sender<DispatchJob>,
    receiver: Mutex<Option<Receiver<DispatchJob>>>,
}

impl EventDispatcher {
    pub fn new(events: BTreeMap<String, CollectionEventDef>, registry: Arc<VariableRegistry>) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            events,
            registry,
            sender,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    pub fn is_registered(&self, event_name: &str) -> bool {
        self.events.contains_key(event_name)
    }

    /// Name of the collection event with id `ceid`.
    pub fn event_name(&self, ceid: u32) -> Option<&str> {
        self.events
            .iter()
            .find(|(_, def)| def.ceid == ceid)
            .map(|(name, _)| name.as_str())
    }

    /// Snapshot the live values linked to `event_name`.
    pub fn build_report(&self, event_name: &str) -> Option<EventReport> {
        let def = self.events.get(event_name)?;
        let reports = def
            .link_reports
            .iter()
            .map(|(report_id, ids)| Report {
                report_id: *report_id,
                values: ids
                    .iter()
                    .filter_map(|id| {
                        let value = self.registry.report_value(*id);
                        if value.is_none() {
                            warn!(event = event_name, report_id, variable_id = id, "Report variable missing");
                        }
                        value
                    })
                    .collect(),
            })
            .collect();
        Some(EventReport {
            event_name: event_name.to_string(),
            ceid: def.ceid,
            reports,
        })
    }

    /// Queue a collection event report. Returns `false` for unregistered events.
    pub fn send_event(&self, event_name: &str) -> bool {
        let Some(report) = self.build_report(event_name) else {
            debug!(event = event_name, "Not a registered collection event");
            return false;
        };
        info!(event = event_name, ceid = report.ceid, "Collection event queued");
        self.enqueue(DispatchJob::Event(report))
    }

    /// Queue an alarm set/clear report.
    pub fn send_alarm(&self, report: AlarmReport) -> bool {
        info!(
            alarm_id = report.alarm_id,
            alarm_code = report.alarm_code,
            occurred = report.occurred,
            "Alarm report queued"
        );
        self.enqueue(DispatchJob::Alarm(report))
    }

    fn enqueue(&self, job: DispatchJob) -> bool {
        if self.sender.send(job).is_err() {
            warn!("Dispatcher queue closed, report dropped");
            return false;
        }
        true
    }

    /// Hand the queue to the dispatcher worker. Only the first call succeeds.
    pub fn take_receiver(&self) -> Option<Receiver<DispatchJob>> {
        self.receiver.lock().take()
    }
}

/// Dispatcher worker body.
///
/// Delivers jobs in queue order until stopped, then drains what is left.
pub fn run(receiver: Receiver<DispatchJob>, host: Arc<dyn HostProtocol>, ctx: &WorkerContext) {
    info!("Dispatcher running");
    while !ctx.token.is_stopped() {
        match receiver.recv_timeout(RECV_POLL) {
            Ok(job) => deliver(host.as_ref(), &job, ctx),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    let mut drained = 0;
    while let Ok(job) = receiver.try_recv() {
        deliver(host.as_ref(), &job, ctx);
        drained += 1;
    }
    debug!(drained, "Dispatcher stopped");
}

fn deliver(host: &dyn HostProtocol, job: &DispatchJob, ctx: &WorkerContext) {
    ctx.stats.record_poll();
    let result = match job {
        DispatchJob::Event(report) => host.send_event_report(report),
        DispatchJob::Alarm(report) => host.send_alarm_report(report),
    };
    match result {
        Ok(()) => ctx.stats.record_trigger(),
        Err(e) => {
            let count = ctx.stats.record_fault(&e);
            if should_log_fault(count) {
                warn!("Host delivery failed ({count} total): {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::WorkerPool;
    use gem_common::equipment::EquipmentDocument;
    use gem_common::host::HostError;
    use gem_common::value::{Value, ValueType};
    use gem_common::equipment::VariableKind;

    #[derive(Default)]
    struct RecordingHost {
        events: Mutex<Vec<EventReport>>,
        alarms: Mutex<Vec<AlarmReport>>,
    }

    impl HostProtocol for RecordingHost {
        fn send_event_report(&self, report: &EventReport) -> Result<(), HostError> {
            self.events.lock().push(report.clone());
            Ok(())
        }

        fn send_alarm_report(&self, report: &AlarmReport) -> Result<(), HostError> {
            self.alarms.lock().push(report.clone());
            Err(HostError::NotConnected)
        }
    }

    fn dispatcher() -> (EventDispatcher, Arc<VariableRegistry>) {
        let doc: EquipmentDocument = r#"{
            "status_variable": {"state": {"svid": 1, "value_type": "UINT_1", "value": 2}},
            "data_values": {"ids": {"dvid": 50, "value_type": "ARRAY", "value": [1, 2]}},
            "collection_events": {
                "state_change": {"ceid": 10, "link_reports": {"100": [1, 50], "101": [50]}}
            }
        }"#
        .parse()
        .unwrap();
        let registry = Arc::new(VariableRegistry::from_document(&doc).unwrap());
        (
            EventDispatcher::new(doc.collection_events.clone(), Arc::clone(&registry)),
            registry,
        )
    }

    #[test]
    fn test_build_report_uses_live_values() {
        let (dispatcher, registry) = dispatcher();
        registry.set(VariableKind::Status, "state", Value::Int(4)).unwrap();
        let report = dispatcher.build_report("state_change").unwrap();
        assert_eq!(report.ceid, 10);
        assert_eq!(report.reports.len(), 2);
        assert_eq!(report.reports[0].report_id, 100);
        assert_eq!(report.reports[0].values[0].value, Value::Int(4));
        assert_eq!(report.reports[0].values[1].item_type, Some(ValueType::U4));
        assert!(dispatcher.build_report("unknown").is_none());
        assert_eq!(dispatcher.event_name(10), Some("state_change"));
    }

    #[test]
    fn test_unregistered_event_not_queued() {
        let (dispatcher, _) = dispatcher();
        assert!(!dispatcher.send_event("unknown"));
        let rx = dispatcher.take_receiver().unwrap();
        assert!(rx.try_recv().is_err());
        assert!(dispatcher.take_receiver().is_none());
    }

    #[test]
    fn test_worker_delivers_in_order_and_counts_faults() {
        let (dispatcher, registry) = dispatcher();
        let host = Arc::new(RecordingHost::default());
        let pool = WorkerPool::new();
        let rx = dispatcher.take_receiver().unwrap();
        let worker_host: Arc<dyn HostProtocol> = host.clone();
        let stats = pool
            .spawn("dispatcher", move |ctx| run(rx, worker_host, &ctx))
            .unwrap();

        for state in 1..=3 {
            registry.set(VariableKind::Status, "state", Value::Int(state)).unwrap();
            assert!(dispatcher.send_event("state_change"));
        }
        dispatcher.send_alarm(AlarmReport {
            alarm_code: 128,
            alarm_id: 7,
            alarm_text: "door open".to_string(),
            occurred: true,
        });
        pool.stop("dispatcher");

        let seen: Vec<Value> = host
            .events
            .lock()
            .iter()
            .map(|r| r.reports[0].values[0].value.clone())
            .collect();
        assert_eq!(seen, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(host.alarms.lock().len(), 1);
        assert_eq!(stats.faults(), 1);
        assert_eq!(stats.triggers(), 3);
    }
}
