//! Automatic, distance-triggered noise capture.
//!
//! This module wires position fixes → movement gate → level sampling +
//! reverse geocoding + geohash → persistence, and publishes status updates
//! along the way.
//!
//! # Architecture
//!
//! ```text
//! PositionSource ──mpsc──▶ ControlLoop (tokio task, owns TrackingSession)
//!                               │
//!                               ├─ Progress → StatusSink
//!                               └─ Trigger  → capture task (one at a time)
//!                                               ├─ SignalLevelSampler ┐ join!
//!                                               ├─ PlaceResolver      ┘
//!                                               ├─ geohash::encode
//!                                               └─ CaptureStore::save
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use noise_mapper::audio::{CpalLevelSource, SignalLevelSampler};
//! use noise_mapper::config::AppConfig;
//! use noise_mapper::pipeline::{AutoCapturePipeline, Collaborators, PipelineOptions, StartRequest};
//! use noise_mapper::place::{NominatimGeocoder, PlaceResolver};
//! use noise_mapper::position::ManualPositionSource;
//! use noise_mapper::status::LogStatusSink;
//! use noise_mapper::store::MemoryStore;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = AppConfig::default();
//!     let deps = Collaborators {
//!         positions: Arc::new(ManualPositionSource::new()),
//!         sampler: SignalLevelSampler::new(Arc::new(CpalLevelSource::from_config(&config.sampler))),
//!         resolver: PlaceResolver::new(
//!             Arc::new(NominatimGeocoder::from_config(&config.geocoder)),
//!             Duration::from_secs(config.geocoder.timeout_secs),
//!         ),
//!         store: Arc::new(MemoryStore::new()),
//!         status: Arc::new(LogStatusSink),
//!     };
//!
//!     let mut pipeline = AutoCapturePipeline::new(deps, PipelineOptions::from_config(&config));
//!     pipeline.start(StartRequest::new("user-1")).await.unwrap();
//!     pipeline.stop().await;
//! }
//! ```

pub mod runner;
pub mod state;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use runner::{
    AutoCapturePipeline, Collaborators, Permissions, PipelineError, PipelineOptions,
    StartRequest,
};
pub use state::TrackingSession;
