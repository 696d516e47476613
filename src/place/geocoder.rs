//! Core `ReverseGeocoder` trait and the `NominatimGeocoder` implementation.
//!
//! `NominatimGeocoder` calls the OpenStreetMap Nominatim `/reverse` endpoint
//! (or any self-hosted instance). All connection details come from
//! [`GeocoderConfig`]; nothing is hardcoded.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::config::GeocoderConfig;

// ---------------------------------------------------------------------------
// GeocodeError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum GeocodeError {
    /// HTTP transport or connection error.
    #[error("HTTP request failed: {0}")]
    Request(String),

    /// The lookup did not complete within the configured timeout.
    #[error("reverse geocoding timed out")]
    Timeout,

    /// The response could not be parsed.
    #[error("failed to parse geocoder response: {0}")]
    Parse(String),

    /// The provider knows nothing at this coordinate.
    #[error("no address found")]
    NoResults,
}

impl From<reqwest::Error> for GeocodeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GeocodeError::Timeout
        } else {
            GeocodeError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// PlaceCandidate
// ---------------------------------------------------------------------------

/// One candidate address returned by a provider. Every component is
/// optional; providers fill what they know.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaceCandidate {
    pub street: Option<String>,
    pub street_number: Option<String>,
    /// Neighbourhood / suburb.
    pub sub_locality: Option<String>,
    /// City, town or village.
    pub locality: Option<String>,
    /// Provider's own single-line rendering.
    pub formatted: Option<String>,
}

// ---------------------------------------------------------------------------
// ReverseGeocoder trait
// ---------------------------------------------------------------------------

/// Async reverse-geocoding provider.
///
/// Implementors must be `Send + Sync` so they can be shared behind
/// `Arc<dyn ReverseGeocoder>`. An empty `Vec` is a valid answer.
#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    async fn lookup(&self, lat: f64, lng: f64) -> Result<Vec<PlaceCandidate>, GeocodeError>;
}

// ---------------------------------------------------------------------------
// NominatimGeocoder
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    error: Option<String>,
    display_name: Option<String>,
    #[serde(default)]
    address: NominatimAddress,
}

#[derive(Debug, Default, Deserialize)]
struct NominatimAddress {
    road: Option<String>,
    pedestrian: Option<String>,
    house_number: Option<String>,
    neighbourhood: Option<String>,
    suburb: Option<String>,
    quarter: Option<String>,
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    municipality: Option<String>,
}

impl From<NominatimResponse> for PlaceCandidate {
    fn from(r: NominatimResponse) -> Self {
        let a = r.address;
        PlaceCandidate {
            street: a.road.or(a.pedestrian),
            street_number: a.house_number,
            sub_locality: a.neighbourhood.or(a.suburb).or(a.quarter),
            locality: a.city.or(a.town).or(a.village).or(a.municipality),
            formatted: r.display_name,
        }
    }
}

/// Calls `{base_url}/reverse?format=jsonv2&lat=..&lon=..&addressdetails=1`.
pub struct NominatimGeocoder {
    client: reqwest::Client,
    config: GeocoderConfig,
}

impl NominatimGeocoder {
    /// Build from config. The HTTP client carries the per-request timeout
    /// and the mandatory `User-Agent`.
    pub fn from_config(config: &GeocoderConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            config: config.clone(),
        }
    }

    fn reverse_url(&self) -> String {
        format!("{}/reverse", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ReverseGeocoder for NominatimGeocoder {
    async fn lookup(&self, lat: f64, lng: f64) -> Result<Vec<PlaceCandidate>, GeocodeError> {
        let response = self
            .client
            .get(self.reverse_url())
            .query(&[
                ("format", "jsonv2".to_string()),
                ("lat", lat.to_string()),
                ("lon", lng.to_string()),
                ("addressdetails", "1".to_string()),
                ("accept-language", self.config.language.clone()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: NominatimResponse = response
            .json()
            .await
            .map_err(|e| GeocodeError::Parse(e.to_string()))?;

        parse_response(body)
    }
}

/// Nominatim answers "nothing here" with HTTP 200 and an `error` field.
fn parse_response(body: NominatimResponse) -> Result<Vec<PlaceCandidate>, GeocodeError> {
    if let Some(err) = &body.error {
        log::debug!("geocoder: provider says {err:?}");
        return Ok(Vec::new());
    }
    Ok(vec![PlaceCandidate::from(body)])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
