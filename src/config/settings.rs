//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across tasks.
//! Every field has a default, so a partial `settings.toml` is valid.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::geo::DistanceFormula;

/// Trigger distance used when neither the caller nor the user's stored
/// settings provide one.
pub const DEFAULT_TRIGGER_DISTANCE_M: f64 = 200.0;

// ---------------------------------------------------------------------------
// TriggerPreset
// ---------------------------------------------------------------------------

/// Named trigger distances offered to users.
///
/// | Variant | Metres |
/// |---------|--------|
/// | Near    | 200    |
/// | Medium  | 500    |
/// | Far     | 1000   |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerPreset {
    Near,
    Medium,
    Far,
}

impl TriggerPreset {
    pub const ALL: [TriggerPreset; 3] = [Self::Near, Self::Medium, Self::Far];

    pub fn meters(self) -> f64 {
        match self {
            Self::Near => 200.0,
            Self::Medium => 500.0,
            Self::Far => 1000.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Near => "near",
            Self::Medium => "medium",
            Self::Far => "far",
        }
    }

    /// The preset whose distance equals `meters`, if any.
    pub fn from_meters(meters: f64) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.meters() == meters)
    }
}

// ---------------------------------------------------------------------------
// AccountConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// Authenticated user id. The `NOISE_MAPPER_USER` environment variable
    /// takes precedence.
    pub user_id: Option<String>,
}

// ---------------------------------------------------------------------------
// TrackingConfig
// ---------------------------------------------------------------------------

/// Movement gate and status settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Fallback trigger distance in metres.
    pub trigger_distance_m: f64,
    /// Distance formula used by the gate.
    pub distance_formula: DistanceFormula,
    /// Ignore fixes whose accuracy radius exceeds this. `None` evaluates
    /// every fix.
    pub max_accuracy_m: Option<f64>,
    /// Seconds the "new record" status stays up before reverting.
    pub status_revert_secs: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            trigger_distance_m: DEFAULT_TRIGGER_DISTANCE_M,
            distance_formula: DistanceFormula::Haversine,
            max_accuracy_m: None,
            status_revert_secs: 3,
        }
    }
}

// ---------------------------------------------------------------------------
// SamplerConfig
// ---------------------------------------------------------------------------

/// Audio capture and level calibration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Input device name; `None` means the system default.
    pub device: Option<String>,
    /// Requested capture rate in Hz.
    pub sample_rate: u32,
    /// Length of one metered buffer in milliseconds.
    pub buffer_ms: u32,
    /// Number of buffers averaged into one reading.
    pub burst_len: usize,
    /// Hard limit on device time per reading.
    pub max_capture_ms: u64,
    /// Added to the dBFS value to approximate dB SPL.
    pub calibration_offset_db: f64,
    /// 16-bit RMS value treated as 0 dBFS.
    pub full_scale_reference: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: 44_100,
            buffer_ms: 500,
            burst_len: 1,
            max_capture_ms: 2_000,
            calibration_offset_db: 90.0,
            full_scale_reference: 32_767.0,
        }
    }
}

// ---------------------------------------------------------------------------
// GeocoderConfig
// ---------------------------------------------------------------------------

/// Reverse-geocoding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocoderConfig {
    /// Base URL of a Nominatim-compatible service.
    pub base_url: String,
    /// Nominatim's usage policy requires an identifying agent.
    pub user_agent: String,
    /// Preferred language for address components.
    pub language: String,
    /// Upper bound for one lookup.
    pub timeout_secs: u64,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://nominatim.openstreetmap.org".into(),
            user_agent: concat!("noise-mapper/", env!("CARGO_PKG_VERSION")).into(),
            language: "es".into(),
            timeout_secs: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// StoreConfig
// ---------------------------------------------------------------------------

/// Which persistence backend receives records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Remote JSON document store over HTTP.
    Rest,
    /// Local JSON-lines journal.
    #[default]
    Journal,
    /// In-process only; records are lost on exit.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Base URL of the document store (REST backend only).
    pub base_url: String,
    /// Bearer token; `None` or empty sends no `Authorization` header.
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            base_url: "http://localhost:8080".into(),
            api_key: None,
            timeout_secs: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// PositionConfig
// ---------------------------------------------------------------------------

/// gpsd connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionConfig {
    /// `host:port` of the gpsd daemon.
    pub gpsd_addr: String,
    /// Minimum seconds between forwarded fixes.
    pub min_interval_secs: u64,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            gpsd_addr: "127.0.0.1:2947".into(),
            min_interval_secs: 15,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// ```rust,no_run
/// use noise_mapper::config::AppConfig;
///
/// // Returns Default when the file is missing.
/// let config = AppConfig::load().unwrap();
/// assert!(config.tracking.trigger_distance_m > 0.0);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Publish transient "new record" notices.
    pub notifications_enabled: bool,
    /// Master switch for automatic capture.
    pub auto_register_enabled: bool,
    pub account: AccountConfig,
    pub tracking: TrackingConfig,
    pub sampler: SamplerConfig,
    pub geocoder: GeocoderConfig,
    pub store: StoreConfig,
    pub position: PositionConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            notifications_enabled: true,
            auto_register_enabled: true,
            account: AccountConfig::default(),
            tracking: TrackingConfig::default(),
            sampler: SamplerConfig::default(),
            geocoder: GeocoderConfig::default(),
            store: StoreConfig::default(),
            position: PositionConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path.
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let d = self.tracking.trigger_distance_m;
        if !(d.is_finite() && d > 0.0) {
            bail!("tracking.trigger_distance_m must be positive, got {d}");
        }
        if self.sampler.buffer_ms == 0 || self.sampler.sample_rate == 0 {
            bail!("sampler.buffer_ms and sampler.sample_rate must be non-zero");
        }
        if u64::from(self.sampler.buffer_ms) > self.sampler.max_capture_ms {
            bail!(
                "sampler.max_capture_ms ({}) is shorter than one buffer ({} ms)",
                self.sampler.max_capture_ms,
                self.sampler.buffer_ms
            );
        }
        if self.sampler.full_scale_reference <= 0.0 {
            bail!("sampler.full_scale_reference must be positive");
        }
        Ok(())
    }

    /// User id from `NOISE_MAPPER_USER`, else from `account.user_id`.
    /// Blank values count as absent.
    pub fn resolve_user_id(&self) -> Option<String> {
        std::env::var("NOISE_MAPPER_USER")
            .ok()
            .or_else(|| self.account.user_id.clone())
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
