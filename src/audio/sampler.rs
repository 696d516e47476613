//! On-demand noise level sampling.
//!
//! * [`LevelSource`]: async trait for anything that can measure one level
//!   reading from a real or simulated device.
//! * [`CpalLevelSource`]: production source: opens the input device on a
//!   blocking thread, meters a short burst, closes the device.
//! * [`SignalLevelSampler`]: wraps any source and never fails: device
//!   problems become [`DEVICE_FALLBACK_DB`], permission problems become
//!   [`PERMISSION_DENIED_DB`].
//!
//! The input device is exclusive per process. [`CpalLevelSource`] holds a
//! lease for the whole lifetime of the stream, and
//! [`LevelSource::release`] waits for it, so a caller can be sure the device
//! is closed before acquiring it again.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::capture::{AudioCapture, AudioChunk, CaptureError};
use super::level::{Calibration, LevelMeter, MAX_LEVEL_DB, MIN_LEVEL_DB};
use crate::config::SamplerConfig;

/// Reading reported when the device cannot be opened or read.
pub const DEVICE_FALLBACK_DB: f64 = 45.0;
/// Sentinel reported when microphone access is denied; outside the sensor
/// range so it can never be mistaken for a measurement.
pub const PERMISSION_DENIED_DB: f64 = 0.0;

/// How often the blocking read loop wakes up to check for cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// SamplerError
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SamplerError {
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("sampling cancelled")]
    Cancelled,
}

impl From<CaptureError> for SamplerError {
    fn from(e: CaptureError) -> Self {
        if let CaptureError::UnsupportedFormat(format) = e {
            return SamplerError::UnsupportedFormat(format!("{format:?}"));
        }
        let msg = e.to_string();
        // Backends surface EACCES only as text ("Permission denied").
        if msg.to_ascii_lowercase().contains("permission") {
            SamplerError::PermissionDenied(msg)
        } else {
            SamplerError::DeviceUnavailable(msg)
        }
    }
}

// ---------------------------------------------------------------------------
// NoiseSample
// ---------------------------------------------------------------------------

/// One level reading, produced once per capture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseSample {
    pub level_db: f64,
    pub captured_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// LevelSource
// ---------------------------------------------------------------------------

#[async_trait]
pub trait LevelSource: Send + Sync {
    /// Measure one level in dB. Must return within a bounded time and must
    /// stop early once `cancel` fires.
    async fn measure(&self, cancel: CancellationToken) -> Result<f64, SamplerError>;

    /// Resolve once no measurement holds the device.
    async fn release(&self) {}
}

// ---------------------------------------------------------------------------
// SignalLevelSampler
// ---------------------------------------------------------------------------

/// Never-failing sampler used by the capture pipeline.
#[derive(Clone)]
pub struct SignalLevelSampler {
    source: Arc<dyn LevelSource>,
}

impl SignalLevelSampler {
    pub fn new(source: Arc<dyn LevelSource>) -> Self {
        Self { source }
    }

    /// Take one reading.
    ///
    /// Returns a value in `[MIN_LEVEL_DB, MAX_LEVEL_DB]` on success,
    /// [`DEVICE_FALLBACK_DB`] on device failure and [`PERMISSION_DENIED_DB`]
    /// when access is denied.
    pub async fn sample(&self, cancel: CancellationToken) -> NoiseSample {
        let level_db = match self.source.measure(cancel).await {
            Ok(db) if db.is_finite() => db.clamp(MIN_LEVEL_DB, MAX_LEVEL_DB),
            Ok(db) => {
                log::warn!("sampler: non-finite reading {db}, using {DEVICE_FALLBACK_DB} dB");
                DEVICE_FALLBACK_DB
            }
            Err(SamplerError::PermissionDenied(msg)) => {
                log::warn!("sampler: {msg}; reporting sentinel {PERMISSION_DENIED_DB} dB");
                PERMISSION_DENIED_DB
            }
            Err(SamplerError::Cancelled) => {
                log::debug!("sampler: cancelled, using {DEVICE_FALLBACK_DB} dB");
                DEVICE_FALLBACK_DB
            }
            Err(e) => {
                log::warn!("sampler: {e}; using {DEVICE_FALLBACK_DB} dB");
                DEVICE_FALLBACK_DB
            }
        };
        NoiseSample {
            level_db,
            captured_at: Utc::now(),
        }
    }

    /// Wait until the underlying device is closed.
    pub async fn release(&self) {
        self.source.release().await;
    }
}

// ---------------------------------------------------------------------------
// CpalLevelSource
// ---------------------------------------------------------------------------

/// Production level source backed by the system input device.
#[derive(Clone)]
pub struct CpalLevelSource {
    config: SamplerConfig,
    lease: Arc<Mutex<()>>,
}

impl CpalLevelSource {
    pub fn from_config(config: &SamplerConfig) -> Self {
        Self {
            config: config.clone(),
            lease: Arc::new(Mutex::new(())),
        }
    }
}

#[async_trait]
impl LevelSource for CpalLevelSource {
    async fn measure(&self, cancel: CancellationToken) -> Result<f64, SamplerError> {
        let lease = tokio::select! {
            guard = Arc::clone(&self.lease).lock_owned() => guard,
            _ = cancel.cancelled() => return Err(SamplerError::Cancelled),
        };

        let config = self.config.clone();
        tokio::task::spawn_blocking(move || {
            // Held until the stream inside capture_burst has been dropped.
            let _lease = lease;
            capture_burst(&config, &cancel)
        })
        .await
        .map_err(|e| SamplerError::DeviceUnavailable(format!("capture worker failed: {e}")))?
    }

    async fn release(&self) {
        let _guard = self.lease.lock().await;
    }
}

/// Open the device, meter up to `burst_len` buffers within
/// `max_capture_ms`, average them, close the device.
fn capture_burst(config: &SamplerConfig, cancel: &CancellationToken) -> Result<f64, SamplerError> {
    let capture = AudioCapture::open(config.device.as_deref(), config.sample_rate)?;
    let (tx, rx) = mpsc::channel();
    let _stream = capture.start(tx)?;
    log::debug!(
        "sampler: device open ({} Hz, {} ch)",
        capture.sample_rate(),
        capture.channels()
    );

    let calibration = Calibration {
        full_scale_reference: config.full_scale_reference,
        offset_db: config.calibration_offset_db,
    };
    let mut meter = LevelMeter::new(capture.sample_rate(), config.buffer_ms, calibration);
    let deadline = Instant::now() + Duration::from_millis(config.max_capture_ms);
    read_burst(&rx, &mut meter, config.burst_len, deadline, cancel)
}

/// Meter chunks from `rx` until `burst_len` buffers are complete or
/// `deadline` passes, and average what was collected.
///
/// A partial burst is averaged when the deadline passes. No complete buffer
/// or a closed stream is [`SamplerError::DeviceUnavailable`].
fn read_burst(
    rx: &mpsc::Receiver<AudioChunk>,
    meter: &mut LevelMeter,
    burst_len: usize,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Result<f64, SamplerError> {
    let burst_len = burst_len.max(1);
    let mut readings: Vec<f64> = Vec::with_capacity(burst_len);

    while readings.len() < burst_len {
        if cancel.is_cancelled() {
            return Err(SamplerError::Cancelled);
        }
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        match rx.recv_timeout((deadline - now).min(POLL_INTERVAL)) {
            Ok(chunk) => readings.extend(meter.push(&chunk.samples)),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                return Err(SamplerError::DeviceUnavailable("audio stream closed".into()));
            }
        }
    }

    readings.truncate(burst_len);
    if readings.is_empty() {
        return Err(SamplerError::DeviceUnavailable(
            "no complete buffer before the capture deadline".into(),
        ));
    }
    Ok(readings.iter().sum::<f64>() / readings.len() as f64)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
