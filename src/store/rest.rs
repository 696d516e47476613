//! Remote JSON document store over HTTP.
//!
//! | Operation | Request |
//! |-----------|---------|
//! | save | `POST {base}/users/{uid}/measurements` → `{"id": "..."}` |
//! | load settings | `GET {base}/users/{uid}/settings` |
//!
//! The `Authorization: Bearer …` header is attached only when an API key is
//! configured and non-empty.

use async_trait::async_trait;
use serde::Deserialize;

use super::record::{CaptureRecord, RecordId, UserSettings};
use super::{CaptureStore, StoreError};
use crate::config::StoreConfig;

#[derive(Debug, Deserialize)]
struct SaveResponse {
    id: String,
}

pub struct RestStore {
    client: reqwest::Client,
    config: StoreConfig,
}

impl RestStore {
    pub fn from_config(config: &StoreConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            config: config.clone(),
        }
    }

    /// `{base}/users/{user_id}/{leaf}` with every segment percent-encoded.
    fn user_url(&self, user_id: &str, leaf: &str) -> Result<reqwest::Url, StoreError> {
        let mut url = reqwest::Url::parse(&self.config.base_url)
            .map_err(|e| StoreError::Request(format!("invalid base url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| StoreError::Request("base url cannot have a path".into()))?
            .pop_if_empty()
            .extend(["users", user_id, leaf]);
        Ok(url)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.api_key.as_deref() {
            Some(key) if !key.is_empty() => req.bearer_auth(key),
            _ => req,
        }
    }
}

#[async_trait]
impl CaptureStore for RestStore {
    async fn save(&self, user_id: &str, record: CaptureRecord) -> Result<RecordId, StoreError> {
        let url = self.user_url(user_id, "measurements")?;
        let response = self
            .authorize(self.client.post(url).json(&record))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Status(status.as_u16()));
        }

        let body: SaveResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Parse(e.to_string()))?;
        Ok(body.id)
    }

    async fn load_settings(&self, user_id: &str) -> Result<UserSettings, StoreError> {
        let url = self.user_url(user_id, "settings")?;
        let response = self.authorize(self.client.get(url)).send().await?;

        match response.status() {
            reqwest::StatusCode::NOT_FOUND => Err(StoreError::NotFound),
            status if !status.is_success() => Err(StoreError::Status(status.as_u16())),
            _ => response
                .json()
                .await
                .map_err(|e| StoreError::Parse(e.to_string())),
        }
    }
}
