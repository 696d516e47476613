//! Per-run tracking state.
//!
//! A [`TrackingSession`] is created by
//! [`AutoCapturePipeline::start`](super::AutoCapturePipeline::start), moved
//! into the control loop, and dropped when the loop ends. Nothing else holds
//! a reference to it, so it needs no locking.

use crate::geo::{GateEvent, MovementGate, PositionFix};

#[derive(Debug)]
pub struct TrackingSession {
    user_id: String,
    gate: MovementGate,
    notifications_enabled: bool,
    microphone_granted: bool,
    active: bool,
}

impl TrackingSession {
    pub fn new(
        user_id: String,
        gate: MovementGate,
        notifications_enabled: bool,
        microphone_granted: bool,
    ) -> Self {
        Self {
            user_id,
            gate,
            notifications_enabled,
            microphone_granted,
            active: true,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn trigger_distance_m(&self) -> f64 {
        self.gate.trigger_distance_m()
    }

    /// The fix most recently accepted as a trigger boundary (or the seed).
    /// Non-triggering fixes never replace it.
    pub fn last_accepted_fix(&self) -> Option<&PositionFix> {
        self.gate.baseline()
    }

    pub fn notifications_enabled(&self) -> bool {
        self.notifications_enabled
    }

    pub fn microphone_granted(&self) -> bool {
        self.microphone_granted
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Feed a fix to the gate. A closed session rejects everything.
    pub fn observe(&mut self, fix: PositionFix) -> GateEvent {
        if !self.active {
            return GateEvent::Rejected;
        }
        self.gate.observe(fix)
    }

    /// End the session and forget the baseline.
    pub fn close(&mut self) {
        self.active = false;
        self.gate.reset();
    }
}
