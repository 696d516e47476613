//! Cross-platform application paths using the `dirs` crate.
//!
//! Layout:
//!
//! Config dir (settings):
//!   Windows: %APPDATA%\noise-mapper\
//!   macOS:   ~/Library/Application Support/noise-mapper/
//!   Linux:   ~/.config/noise-mapper/
//!
//! Data dir (offline record journal):
//!   Windows: %LOCALAPPDATA%\noise-mapper\
//!   macOS:   ~/Library/Application Support/noise-mapper/
//!   Linux:   ~/.local/share/noise-mapper/

use std::path::PathBuf;

/// Holds all resolved application directory/file paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Directory for `settings.toml`.
    pub config_dir: PathBuf,
    /// Full path to `settings.toml`.
    pub settings_file: PathBuf,
    /// Directory for locally stored data.
    pub data_dir: PathBuf,
    /// Append-only JSON-lines file used by the journal store.
    pub journal_file: PathBuf,
    /// Per-user settings read by the journal store.
    pub user_settings_file: PathBuf,
}

impl AppPaths {
    const APP_NAME: &'static str = "noise-mapper";

    /// Falls back to the current directory if the platform cannot provide a
    /// standard path.
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let settings_file = config_dir.join("settings.toml");
        let journal_file = data_dir.join("measurements.jsonl");
        let user_settings_file = data_dir.join("user-settings.json");

        Self {
            config_dir,
            settings_file,
            data_dir,
            journal_file,
            user_settings_file,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}
