//! noise-mapper: automatic, distance-triggered noise measurements.
//!
//! While the device moves, every time it covers the configured trigger
//! distance the pipeline samples the microphone level, resolves the place,
//! computes a geohash key and saves one record.

pub mod audio;
pub mod config;
pub mod geo;
pub mod pipeline;
pub mod place;
pub mod position;
pub mod status;
pub mod store;
