//! Reverse geocoding for capture records.
//!
//! This module provides:
//! * [`ReverseGeocoder`]: async trait implemented by provider backends.
//! * [`NominatimGeocoder`]: OpenStreetMap Nominatim backend.
//! * [`PlaceResolver`]: timeout + address composition + fallback; never fails.
//! * [`GeocodeError`]: error variants for provider lookups.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use noise_mapper::config::GeocoderConfig;
//! use noise_mapper::place::{NominatimGeocoder, PlaceResolver};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = GeocoderConfig::default();
//!     let resolver = PlaceResolver::new(
//!         Arc::new(NominatimGeocoder::from_config(&config)),
//!         Duration::from_secs(config.timeout_secs),
//!     );
//!     println!("{}", resolver.resolve(40.4168, -3.7038).await);
//! }
//! ```

pub mod geocoder;
pub mod resolver;

pub use geocoder::{GeocodeError, NominatimGeocoder, PlaceCandidate, ReverseGeocoder};
pub use resolver::{compose_address, PlaceResolver, UNKNOWN_LOCATION};
