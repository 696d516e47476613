//! Configuration module for noise-mapper.
//!
//! Provides `AppConfig` (top-level settings), sub-configs for each subsystem,
//! `AppPaths` for cross-platform data directories, and TOML persistence via
//! `AppConfig::load` / `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{
    AccountConfig, AppConfig, GeocoderConfig, PositionConfig, SamplerConfig, StoreBackend,
    StoreConfig, TrackingConfig, TriggerPreset, DEFAULT_TRIGGER_DISTANCE_M,
};
