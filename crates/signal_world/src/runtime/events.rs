//! World observer notifications.
//!
//! A fixed set of optional handler slots, one per lifecycle event. Handlers
//! are fault-isolated by the orchestrator: a panicking handler is logged and
//! never propagated to the caller.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use signal_world_proto::BlockNumber;

use super::signal::Signal;

/// Read-only view of the world handed to every handler alongside its event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldStatus {
    pub position: Option<BlockNumber>,
    pub epoch_number: u64,
    pub listening: bool,
}

/// An inbound signal that failed admission. `signal` is absent only when the
/// raw input could not be coerced into a signal at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IgnoreNotice {
    pub signal: Option<Signal>,
    pub reason: String,
}

/// A confirmed signal that failed verification during inclusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectNotice {
    pub signal: Signal,
    pub reason: String,
    pub signal_digest: String,
}

/// Outcome of one `advance` pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvanceReport {
    pub position: BlockNumber,
    pub included: Vec<Signal>,
    pub rejected: Vec<RejectNotice>,
    pub clock_updates: u64,
    pub directory_updates: u64,
}

/// Outcome of one `drop_signals` pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropReport {
    pub removed: Vec<Signal>,
    pub at_block: BlockNumber,
}

/// Observer slots for world lifecycle events. Every method defaults to a
/// no-op; implement only the ones you care about.
pub trait WorldObserver: Send {
    fn on_buffer(&self, _signal: &Signal, _status: &WorldStatus) {}
    fn on_receive(&self, _signal: &Signal, _status: &WorldStatus) {}
    fn on_ignore(&self, _notice: &IgnoreNotice, _status: &WorldStatus) {}
    fn on_advance(&self, _report: &AdvanceReport, _status: &WorldStatus) {}
    fn on_reject(&self, _notice: &RejectNotice, _status: &WorldStatus) {}
    fn on_drop(&self, _report: &DropReport, _status: &WorldStatus) {}
}

/// Everything a [`RecordingObserver`] saw, in dispatch order.
#[derive(Debug, Clone, PartialEq)]
pub enum ObservedEvent {
    Buffer { uuid: String },
    Receive { uuid: String },
    Ignore { uuid: Option<String>, reason: String },
    Advance { position: BlockNumber, included: Vec<String>, rejected: Vec<String> },
    Reject { uuid: String, reason: String },
    Drop { removed: BTreeMap<String, BlockNumber> },
}

/// Observer that records every dispatch. Test instrumentation.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<ObservedEvent>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events.lock().expect("lock events").clone()
    }

    pub fn ignored_reasons(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ObservedEvent::Ignore { reason, .. } => Some(reason),
                _ => None,
            })
            .collect()
    }

    pub fn advance_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, ObservedEvent::Advance { .. }))
            .count()
    }

    fn push(&self, event: ObservedEvent) {
        self.events.lock().expect("lock events").push(event);
    }
}

impl WorldObserver for RecordingObserver {
    fn on_buffer(&self, signal: &Signal, _status: &WorldStatus) {
        self.push(ObservedEvent::Buffer {
            uuid: signal.uuid.clone(),
        });
    }

    fn on_receive(&self, signal: &Signal, _status: &WorldStatus) {
        self.push(ObservedEvent::Receive {
            uuid: signal.uuid.clone(),
        });
    }

    fn on_ignore(&self, notice: &IgnoreNotice, _status: &WorldStatus) {
        self.push(ObservedEvent::Ignore {
            uuid: notice.signal.as_ref().map(|signal| signal.uuid.clone()),
            reason: notice.reason.clone(),
        });
    }

    fn on_advance(&self, report: &AdvanceReport, _status: &WorldStatus) {
        self.push(ObservedEvent::Advance {
            position: report.position,
            included: report
                .included
                .iter()
                .map(|signal| signal.uuid.clone())
                .collect(),
            rejected: report
                .rejected
                .iter()
                .map(|notice| notice.signal.uuid.clone())
                .collect(),
        });
    }

    fn on_reject(&self, notice: &RejectNotice, _status: &WorldStatus) {
        self.push(ObservedEvent::Reject {
            uuid: notice.signal.uuid.clone(),
            reason: notice.reason.clone(),
        });
    }

    fn on_drop(&self, report: &DropReport, _status: &WorldStatus) {
        self.push(ObservedEvent::Drop {
            removed: report
                .removed
                .iter()
                .map(|signal| (signal.uuid.clone(), report.at_block))
                .collect(),
        });
    }
}
