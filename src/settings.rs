//! Persistent player settings.
//!
//! Stored as JSON in the platform configuration directory. A missing or
//! unreadable file yields the defaults, which are written back in its place.

use crate::playback::FrameRate;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const SETTINGS_FILE: &str = "settings.json";

/// Options remembered between runs of the terminal player.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory shown by the file browser on startup.
    pub last_directory: Option<PathBuf>,
    /// Emit MIDI Time Code while playing.
    pub mtc: bool,
    /// Loop files continuously.
    #[serde(rename = "loop")]
    pub looping: bool,
    pub frame_rate: FrameRate,
}

impl Settings {
    /// Location of the settings file, if the platform has a config directory.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "smfplay", "smfplay")
            .map(|dirs| dirs.config_dir().join(SETTINGS_FILE))
    }

    /// Loads settings from the default location, falling back to defaults.
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_or_init(&path),
            None => Self::default(),
        }
    }

    /// Loads settings from `path`. A missing or corrupt file is replaced by
    /// the defaults. Write failures are logged.
    pub fn load_or_init(path: &Path) -> Self {
        match Self::load_from_file(path) {
            Ok(settings) => return settings,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Replacing settings at {}: {}", path.display(), e),
        }
        let settings = Self::default();
        if let Err(e) = settings.save_to_file(path) {
            tracing::warn!("Could not save settings to {}: {}", path.display(), e);
        }
        settings
    }

    /// Loads settings from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns error if file reading or parsing fails
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let json = fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Saves settings as JSON, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or file writing fails
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(path, json)
    }

    /// Directory to open the browser in: the remembered one if it still
    /// exists, otherwise the current directory.
    pub fn start_directory(&self) -> PathBuf {
        self.last_directory
            .as_ref()
            .filter(|dir| dir.is_dir())
            .cloned()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_default())
    }
}
