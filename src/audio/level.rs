//! Sound-pressure level metering.
//!
//! Samples are measured on a signed 16-bit scale: the RMS of each buffer is
//! converted with
//!
//! ```text
//! dB = 20 · log10(rms / full_scale_reference) + calibration_offset
//! ```
//!
//! and clamped to the realistic sensor range
//! `[MIN_LEVEL_DB, MAX_LEVEL_DB]`.
//!
//! [`LevelMeter`] slices an arbitrary chunk stream into fixed-length buffers
//! and yields one reading per completed buffer.
//!
//! ```rust
//! use noise_mapper::audio::{Calibration, LevelMeter};
//!
//! let mut meter = LevelMeter::new(44_100, 500, Calibration::default());
//! let half_second = vec![0.5_f32; 22_050];
//! let readings = meter.push(&half_second);
//! assert_eq!(readings.len(), 1);
//! assert!((readings[0] - 84.0).abs() < 0.1);
//! ```

/// Lowest reading the sensor reports.
pub const MIN_LEVEL_DB: f64 = 30.0;
/// Highest reading the sensor reports.
pub const MAX_LEVEL_DB: f64 = 120.0;

const I16_FULL_SCALE: f64 = 32_767.0;

/// Conversion constants from RMS amplitude to dB.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    /// RMS value treated as 0 dBFS, on the 16-bit scale.
    pub full_scale_reference: f64,
    /// Offset added after the log conversion to approximate dB SPL.
    pub offset_db: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            full_scale_reference: I16_FULL_SCALE,
            offset_db: 90.0,
        }
    }
}

/// RMS of `samples` rescaled to the signed 16-bit range.
pub fn rms_i16(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let v = f64::from(s.clamp(-1.0, 1.0)) * I16_FULL_SCALE;
            v * v
        })
        .sum();
    (sum_sq / samples.len() as f64).sqrt()
}

/// Convert an RMS amplitude to a clamped level in dB.
pub fn level_db(rms: f64, calibration: &Calibration) -> f64 {
    // Silence would be -inf; floor the ratio so the clamp can take over.
    let ratio = (rms / calibration.full_scale_reference).max(1e-10);
    (20.0 * ratio.log10() + calibration.offset_db).clamp(MIN_LEVEL_DB, MAX_LEVEL_DB)
}

/// Splits incoming audio into fixed-size buffers and meters each one.
#[derive(Debug)]
pub struct LevelMeter {
    frame_len: usize,
    pending: Vec<f32>,
    calibration: Calibration,
}

impl LevelMeter {
    /// `buffer_ms` of audio at `sample_rate` Hz per reading.
    pub fn new(sample_rate: u32, buffer_ms: u32, calibration: Calibration) -> Self {
        let frame_len = ((u64::from(sample_rate) * u64::from(buffer_ms)) / 1_000).max(1) as usize;
        Self {
            frame_len,
            pending: Vec::with_capacity(frame_len),
            calibration,
        }
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Append `samples`; returns one reading per buffer completed by them.
    pub fn push(&mut self, samples: &[f32]) -> Vec<f64> {
        let mut readings = Vec::new();
        let mut rest = samples;
        while !rest.is_empty() {
            let take = (self.frame_len - self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.pending.len() == self.frame_len {
                readings.push(level_db(rms_i16(&self.pending), &self.calibration));
                self.pending.clear();
            }
        }
        readings
    }
}
