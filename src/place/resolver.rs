//! Never-failing place resolution.
//!
//! [`PlaceResolver`] wraps any [`ReverseGeocoder`], bounds each lookup with a
//! timeout, composes a short address from the first candidate, and returns
//! [`UNKNOWN_LOCATION`] instead of propagating any error.

use std::sync::Arc;
use std::time::Duration;

use super::geocoder::{GeocodeError, PlaceCandidate, ReverseGeocoder};

/// Address used whenever nothing better is available.
pub const UNKNOWN_LOCATION: &str = "Ubicación desconocida";

/// Join the present components of `candidate` in priority order: street,
/// street number, sub-locality, locality. Falls back to the provider's
/// single-line address. `None` when neither exists.
///
/// ```rust
/// use noise_mapper::place::{compose_address, PlaceCandidate};
///
/// let c = PlaceCandidate {
///     street: Some("Gran Vía".into()),
///     street_number: Some("28".into()),
///     locality: Some("Madrid".into()),
///     ..Default::default()
/// };
/// assert_eq!(compose_address(&c).as_deref(), Some("Gran Vía, 28, Madrid"));
/// ```
pub fn compose_address(candidate: &PlaceCandidate) -> Option<String> {
    let parts: Vec<&str> = [
        &candidate.street,
        &candidate.street_number,
        &candidate.sub_locality,
        &candidate.locality,
    ]
    .into_iter()
    .filter_map(|part| part.as_deref())
    .map(str::trim)
    .filter(|part| !part.is_empty())
    .collect();

    if !parts.is_empty() {
        return Some(parts.join(", "));
    }

    candidate
        .formatted
        .as_deref()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
}

#[derive(Clone)]
pub struct PlaceResolver {
    geocoder: Arc<dyn ReverseGeocoder>,
    timeout: Duration,
}

impl PlaceResolver {
    pub fn new(geocoder: Arc<dyn ReverseGeocoder>, timeout: Duration) -> Self {
        Self { geocoder, timeout }
    }

    /// Resolve `(lat, lng)` to a short address. Never fails.
    pub async fn resolve(&self, lat: f64, lng: f64) -> String {
        match self.try_resolve(lat, lng).await {
            Ok(address) => address,
            Err(e) => {
                log::warn!("place: ({lat:.5}, {lng:.5}) unresolved ({e}), using fallback");
                UNKNOWN_LOCATION.to_string()
            }
        }
    }

    /// The fallible lookup behind [`resolve`](Self::resolve).
    pub async fn try_resolve(&self, lat: f64, lng: f64) -> Result<String, GeocodeError> {
        let candidates = tokio::time::timeout(self.timeout, self.geocoder.lookup(lat, lng))
            .await
            .map_err(|_| GeocodeError::Timeout)??;

        candidates
            .first()
            .and_then(compose_address)
            .ok_or(GeocodeError::NoResults)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
