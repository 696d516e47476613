//! Audio level sampling: microphone → mono chunks → fixed buffers → dB.
//!
//! # Pipeline
//!
//! ```text
//! Microphone → cpal callback → downmix → AudioChunk (mpsc)
//!           → LevelMeter (500 ms buffers, RMS → dB, clamp)
//!           → burst average → SignalLevelSampler fallbacks
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use noise_mapper::audio::{CpalLevelSource, SignalLevelSampler};
//! use noise_mapper::config::SamplerConfig;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() {
//! let source = CpalLevelSource::from_config(&SamplerConfig::default());
//! let sampler = SignalLevelSampler::new(Arc::new(source));
//! let sample = sampler.sample(CancellationToken::new()).await;
//! println!("{:.1} dB", sample.level_db);
//! # }
//! ```

pub mod capture;
pub mod level;
pub mod sampler;

pub use capture::{downmix, AudioCapture, AudioChunk, CaptureError, StreamHandle};
pub use level::{level_db, rms_i16, Calibration, LevelMeter, MAX_LEVEL_DB, MIN_LEVEL_DB};
pub use sampler::{
    CpalLevelSource, LevelSource, NoiseSample, SamplerError, SignalLevelSampler,
    DEVICE_FALLBACK_DB, PERMISSION_DENIED_DB,
};
