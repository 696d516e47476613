//! Persistence of capture records and per-user settings.
//!
//! This module provides:
//! * [`CaptureStore`]: async trait implemented by every backend.
//! * [`RestStore`]: remote JSON document store.
//! * [`JournalStore`]: local JSON-lines journal (default).
//! * [`MemoryStore`]: in-process store.
//! * [`CaptureRecord`] / [`UserSettings`]: the persisted documents.

pub mod journal;
pub mod memory;
pub mod record;
pub mod rest;

use async_trait::async_trait;
use thiserror::Error;

pub use journal::{JournalEntry, JournalStore};
pub use memory::MemoryStore;
pub use record::{CaptureRecord, RecordId, UserSettings};
pub use rest::RestStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Request(String),

    #[error("store returned HTTP {0}")]
    Status(u16),

    #[error("failed to parse store document: {0}")]
    Parse(String),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("document not found")]
    NotFound,
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Request(e.to_string())
    }
}

/// Async persistence backend.
///
/// Implementors must be `Send + Sync` so they can be shared behind
/// `Arc<dyn CaptureStore>` across the capture tasks.
#[async_trait]
pub trait CaptureStore: Send + Sync {
    /// Persist one record under `user_id`, returning the assigned id.
    async fn save(&self, user_id: &str, record: CaptureRecord) -> Result<RecordId, StoreError>;

    /// Read the user's saved settings. [`StoreError::NotFound`] when the
    /// user never saved any.
    async fn load_settings(&self, user_id: &str) -> Result<UserSettings, StoreError>;
}
