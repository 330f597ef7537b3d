//! Admission gate: the buffering state machine guarding the received pool.

use std::collections::VecDeque;

use super::signal::Signal;

/// Gate states. `Buffering` parks inbound signals instead of admitting them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Open,
    Buffering,
}

/// Non-blocking advisory lock over signal admission.
///
/// Operations that mutate the epoch or position close the gate on entry and
/// reopen it on exit; admission becomes a buffering no-op in between. A
/// second close while already buffering is rejected, which is how re-entrant
/// gate-guarded operations are refused.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    state: GateState,
    buffered: VecDeque<Signal>,
}

impl AdmissionGate {
    /// A new gate starts buffering; `build` opens it once the world is ready.
    pub fn new() -> Self {
        Self {
            state: GateState::Buffering,
            buffered: VecDeque::new(),
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == GateState::Open
    }

    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    /// Close the gate. Returns false when it is already buffering.
    pub fn try_close(&mut self) -> bool {
        if self.state == GateState::Buffering {
            return false;
        }
        self.state = GateState::Buffering;
        true
    }

    /// Open the gate and hand back everything parked, in arrival order.
    pub fn open(&mut self) -> Vec<Signal> {
        self.state = GateState::Open;
        self.buffered.drain(..).collect()
    }

    /// Park a signal while buffering.
    pub fn park(&mut self, signal: Signal) {
        self.buffered.push_back(signal);
    }

    /// Discard everything parked. Used when the pools are retired wholesale.
    pub fn clear_buffered(&mut self) {
        self.buffered.clear();
    }
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new()
    }
}
