//! Documents exchanged with the persistence store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_TRIGGER_DISTANCE_M;

/// Identifier assigned by the store to a saved record.
pub type RecordId = String;

/// One automatic noise measurement, ready for persistence.
///
/// Serialised in camelCase, which is the document shape the remote store
/// and the journal both use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRecord {
    /// Calibrated level, or a fallback/sentinel value.
    pub level_db: f64,
    pub latitude: f64,
    pub longitude: f64,
    /// 8-character geohash of `(latitude, longitude)`.
    pub spatial_key: String,
    pub address: String,
    /// Distance from the previous baseline that fired this capture.
    pub distance_m: f64,
    /// Always `true` for records produced by the pipeline.
    pub auto_generated: bool,
    pub captured_at: DateTime<Utc>,
}

/// Per-user settings persisted alongside the records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserSettings {
    pub trigger_distance_m: f64,
    pub notifications_enabled: bool,
    pub auto_register_enabled: bool,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            trigger_distance_m: DEFAULT_TRIGGER_DISTANCE_M,
            notifications_enabled: true,
            auto_register_enabled: true,
        }
    }
}
