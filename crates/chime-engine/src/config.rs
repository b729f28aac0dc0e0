//! Player configuration.
//!
//! Pool size, device format and log filter, loaded from and saved to a TOML
//! file. Anything missing from the file takes its default value.

use chime_common::FormatDescriptor;
use chime_kernel::{EngineSettings, DEFAULT_CHANNEL_COUNT};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Configuration file name.
const CONFIG_FILE: &str = "chime.toml";

/// Largest pool the player will configure.
pub const MAX_CHANNELS: usize = 256;

/// Player configuration parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of simultaneous playback channels
    pub channel_count: usize,
    /// PCM format every sound must be authored in
    pub device_format: FormatDescriptor,
    /// `tracing` filter directives (e.g. "chime=debug")
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            channel_count: DEFAULT_CHANNEL_COUNT,
            device_format: FormatDescriptor::CD_QUALITY,
            log_filter: "chime=info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the default file location.
    /// Returns default config if file doesn't exist.
    pub fn load() -> Self {
        Self::load_from(Self::config_path())
    }

    /// Load configuration from a specific path.
    /// Returns default config if file doesn't exist or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            info!("Config file not found, using defaults");
            return Self::default();
        }

        let mut contents = String::new();
        if let Err(e) = fs::File::open(path).and_then(|mut f| f.read_to_string(&mut contents)) {
            warn!("Failed to read config file {}: {e}", path.display());
            return Self::default();
        }

        match toml::from_str::<Self>(&contents) {
            Ok(mut config) => {
                config.validate();
                info!("Loaded config from {}", path.display());
                config
            },
            Err(e) => {
                warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            },
        }
    }

    /// Save configuration to the default file location.
    pub fn save(&self) -> io::Result<()> {
        self.save_to(Self::config_path())
    }

    /// Save configuration to a specific path.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut file = fs::File::create(path)?;
        file.write_all(contents.as_bytes())?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn config_path() -> PathBuf {
        if let Some(config_dir) = dirs_config_path() {
            config_dir.join("chime").join(CONFIG_FILE)
        } else {
            PathBuf::from(CONFIG_FILE)
        }
    }

    /// Clamp values to supported ranges.
    pub fn validate(&mut self) {
        self.channel_count = self.channel_count.clamp(1, MAX_CHANNELS);
        if self.log_filter.trim().is_empty() {
            self.log_filter = Self::default().log_filter;
        }
    }

    /// Kernel construction parameters for this configuration.
    #[must_use]
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings::default()
            .with_channel_count(self.channel_count)
            .with_device_format(self.device_format)
    }
}

/// Get platform-specific config directory.
fn dirs_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|home| PathBuf::from(home).join("Library/Application Support"))
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
    {
        None
    }
}
