//! In-process store. Nothing survives the process; handy for dry runs.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::record::{CaptureRecord, RecordId, UserSettings};
use super::{CaptureStore, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<(RecordId, String, CaptureRecord)>>,
    settings: Mutex<HashMap<String, UserSettings>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of `(id, user_id, record)` in save order.
    pub async fn records(&self) -> Vec<(RecordId, String, CaptureRecord)> {
        self.records.lock().await.clone()
    }

    pub async fn set_settings(&self, user_id: &str, settings: UserSettings) {
        self.settings
            .lock()
            .await
            .insert(user_id.to_string(), settings);
    }
}

#[async_trait]
impl CaptureStore for MemoryStore {
    async fn save(&self, user_id: &str, record: CaptureRecord) -> Result<RecordId, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.records
            .lock()
            .await
            .push((id.clone(), user_id.to_string(), record));
        Ok(id)
    }

    async fn load_settings(&self, user_id: &str) -> Result<UserSettings, StoreError> {
        self.settings
            .lock()
            .await
            .get(user_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn keeps_records_and_settings() {
        let store = MemoryStore::new();
        let record = CaptureRecord {
            level_db: 45.0,
            latitude: 1.0,
            longitude: 2.0,
            spatial_key: "s01".into(),
            address: "x".into(),
            distance_m: 300.0,
            auto_generated: true,
            captured_at: Utc::now(),
        };
        let id = store.save("u", record.clone()).await.unwrap();

        let records = store.records().await;
        assert_eq!(records, vec![(id, "u".to_string(), record)]);

        assert!(matches!(store.load_settings("u").await, Err(StoreError::NotFound)));
        store.set_settings("u", UserSettings::default()).await;
        assert_eq!(store.load_settings("u").await.unwrap(), UserSettings::default());
    }
}
