//! Local append-only journal store.
//!
//! Each saved record becomes one JSON line `{"id", "userId", "record"}` in
//! the journal file. Per-user settings are read from a JSON object keyed by
//! user id. Useful offline and as the default backend.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::record::{CaptureRecord, RecordId, UserSettings};
use super::{CaptureStore, StoreError};

/// One line of the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub id: RecordId,
    pub user_id: String,
    pub record: CaptureRecord,
}

pub struct JournalStore {
    journal_file: PathBuf,
    settings_file: PathBuf,
    // Serialises appends so concurrent saves never interleave lines.
    write_lock: Mutex<()>,
}

impl JournalStore {
    pub fn new(journal_file: impl Into<PathBuf>, settings_file: impl Into<PathBuf>) -> Self {
        Self {
            journal_file: journal_file.into(),
            settings_file: settings_file.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn journal_file(&self) -> &Path {
        &self.journal_file
    }

    /// Read every entry back. A missing journal is empty.
    pub async fn entries(&self) -> Result<Vec<JournalEntry>, StoreError> {
        let text = match tokio::fs::read_to_string(&self.journal_file).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(|e| StoreError::Parse(e.to_string())))
            .collect()
    }
}

#[async_trait]
impl CaptureStore for JournalStore {
    async fn save(&self, user_id: &str, record: CaptureRecord) -> Result<RecordId, StoreError> {
        let entry = JournalEntry {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            record,
        };
        let mut line =
            serde_json::to_string(&entry).map_err(|e| StoreError::Parse(e.to_string()))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.journal_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.journal_file)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        log::debug!("store: journaled record {} for {user_id}", entry.id);
        Ok(entry.id)
    }

    async fn load_settings(&self, user_id: &str) -> Result<UserSettings, StoreError> {
        let text = match tokio::fs::read_to_string(&self.settings_file).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound)
            }
            Err(e) => return Err(e.into()),
        };

        let mut all: HashMap<String, UserSettings> =
            serde_json::from_str(&text).map_err(|e| StoreError::Parse(e.to_string()))?;
        all.remove(user_id).ok_or(StoreError::NotFound)
    }
}
