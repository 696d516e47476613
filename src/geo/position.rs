//! Position fixes as delivered by a [`PositionSource`](crate::position::PositionSource).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single position report.
///
/// Immutable once produced; fixes are ephemeral and never persisted on their
/// own (only the coordinates of a triggering fix end up in a record).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    /// Latitude in decimal degrees, `[-90, 90]`.
    pub latitude: f64,
    /// Longitude in decimal degrees, `[-180, 180]`.
    pub longitude: f64,
    /// Estimated horizontal error radius in metres.
    pub accuracy_m: f64,
    /// When the receiver observed this position.
    pub observed_at: DateTime<Utc>,
}

impl PositionFix {
    /// Build a fix observed "now".
    pub fn new(latitude: f64, longitude: f64, accuracy_m: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_m,
            observed_at: Utc::now(),
        }
    }

    /// `true` when both coordinates are finite and within WGS-84 bounds.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}
