//! Application settings

use std::path::{Path, PathBuf};

use ant_link::LinkConfig;
use ant_sim::VirtualPeerConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors saving the settings file
#[derive(Debug, Error)]
pub enum SettingsError {
    /// No home or config directory could be determined
    #[error("could not determine settings path")]
    NoPath,

    /// Filesystem error
    #[error("failed to write settings: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Channel and link behaviour
    #[serde(default)]
    pub link: LinkConfig,
    /// Search as soon as the application starts
    #[serde(default)]
    pub auto_search: bool,
    /// Channels on the simulated radio
    #[serde(default = "default_simulated_channels")]
    pub simulated_channels: usize,
    /// Lights within range of the simulated radio
    #[serde(default = "default_simulated_peers")]
    pub simulated_peers: Vec<VirtualPeerConfig>,
}

fn default_simulated_channels() -> usize {
    8
}

fn default_simulated_peers() -> Vec<VirtualPeerConfig> {
    vec![
        VirtualPeerConfig {
            name: "Desk Lamp".to_string(),
            device_number: 1,
            initial_intensity: Some(40),
            ..Default::default()
        },
        VirtualPeerConfig {
            name: "Ceiling Light".to_string(),
            device_number: 2,
            initial_intensity: Some(75),
            ..Default::default()
        },
    ]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            auto_search: false,
            simulated_channels: default_simulated_channels(),
            simulated_peers: default_simulated_peers(),
        }
    }
}

impl Settings {
    /// Get the XDG config directory for antlight
    /// Uses $XDG_CONFIG_HOME/antlight, falls back to ~/.config/antlight
    fn config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("antlight"));
            }
        }

        dirs::home_dir().map(|h| h.join(".config").join("antlight"))
    }

    /// Get the settings file path
    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("settings.json"))
    }

    /// Load settings from disk, falling back to defaults
    pub fn load() -> Self {
        Self::settings_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default()
    }

    /// Load settings from a specific file, falling back to defaults
    pub fn load_from(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Save settings to disk
    pub fn save(&self) -> Result<PathBuf, SettingsError> {
        let path = Self::settings_path().ok_or(SettingsError::NoPath)?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save settings to a specific file
    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reset every setting to its default
    pub fn restore_defaults(&mut self) {
        *self = Self::default();
    }
}
