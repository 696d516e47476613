//! Distance-triggered movement gate.
//!
//! [`MovementGate`] decides, one fix at a time, whether the device has moved
//! at least the trigger distance since the last accepted baseline.
//!
//! ```text
//! Unseeded ──first fix──▶ Seeded(baseline)
//! Seeded(b) ──fix, d <  D──▶ Seeded(b)      Progress { d }
//! Seeded(b) ──fix, d >= D──▶ Seeded(fix)    Trigger { fix, d }
//! ```
//!
//! Intermediate fixes never move the baseline; only a trigger does.

use super::distance::DistanceFormula;
use super::position::PositionFix;

/// Outcome of feeding one fix to the gate.
#[derive(Debug, Clone, PartialEq)]
pub enum GateEvent {
    /// First usable fix; it became the baseline.
    Seeded,
    /// Baseline kept; `distance_m` is the distance travelled from it so far.
    Progress { distance_m: f64 },
    /// Trigger distance reached; `fix` is the new baseline.
    Trigger { fix: PositionFix, distance_m: f64 },
    /// Fix ignored by the accuracy filter or because it is malformed.
    Rejected,
}

/// Gate state, observable for status reporting and tests.
#[derive(Debug, Clone, PartialEq)]
pub enum GateState {
    Unseeded,
    Seeded { baseline: PositionFix },
}

#[derive(Debug, Clone)]
pub struct MovementGate {
    trigger_distance_m: f64,
    formula: DistanceFormula,
    /// When set, fixes whose accuracy radius is worse than this are ignored.
    max_accuracy_m: Option<f64>,
    state: GateState,
}

impl MovementGate {
    pub fn new(trigger_distance_m: f64) -> Self {
        Self {
            trigger_distance_m,
            formula: DistanceFormula::default(),
            max_accuracy_m: None,
            state: GateState::Unseeded,
        }
    }

    pub fn with_formula(mut self, formula: DistanceFormula) -> Self {
        self.formula = formula;
        self
    }

    /// Enable the accuracy filter. Off by default: every fix is evaluated.
    pub fn with_max_accuracy(mut self, max_accuracy_m: Option<f64>) -> Self {
        self.max_accuracy_m = max_accuracy_m;
        self
    }

    pub fn trigger_distance_m(&self) -> f64 {
        self.trigger_distance_m
    }

    pub fn state(&self) -> &GateState {
        &self.state
    }

    /// The current baseline, if seeded.
    pub fn baseline(&self) -> Option<&PositionFix> {
        match &self.state {
            GateState::Unseeded => None,
            GateState::Seeded { baseline } => Some(baseline),
        }
    }

    /// Feed the next fix in arrival order.
    pub fn observe(&mut self, fix: PositionFix) -> GateEvent {
        if !fix.is_valid() {
            log::warn!(
                "gate: ignoring malformed fix ({}, {})",
                fix.latitude,
                fix.longitude
            );
            return GateEvent::Rejected;
        }
        if let Some(limit) = self.max_accuracy_m {
            if fix.accuracy_m > limit {
                log::debug!(
                    "gate: fix accuracy {:.1} m exceeds {:.1} m, ignored",
                    fix.accuracy_m,
                    limit
                );
                return GateEvent::Rejected;
            }
        }

        let baseline = match &self.state {
            GateState::Unseeded => {
                self.state = GateState::Seeded { baseline: fix };
                return GateEvent::Seeded;
            }
            GateState::Seeded { baseline } => *baseline,
        };

        let distance_m = self.formula.distance_m(
            baseline.latitude,
            baseline.longitude,
            fix.latitude,
            fix.longitude,
        );

        if distance_m >= self.trigger_distance_m {
            self.state = GateState::Seeded { baseline: fix };
            GateEvent::Trigger { fix, distance_m }
        } else {
            GateEvent::Progress { distance_m }
        }
    }

    /// Forget the baseline.
    pub fn reset(&mut self) {
        self.state = GateState::Unseeded;
    }
}
