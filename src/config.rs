//! Configuration management for multicam
//!
//! Provides configuration loading, saving, and validation for enumeration
//! timing, probe matrix, session retry policy, the frame pipeline and the
//! capability cache location.

use crate::errors::CameraError;
use crate::types::{FormatTag, ModeDescriptor};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Hard ceiling on open attempts for both probing and session start.
pub const MAX_OPEN_ATTEMPTS: u32 = 3;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MultiCamConfig {
    pub catalog: CatalogConfig,
    pub probe: ProbeConfig,
    pub session: SessionConfig,
    pub pipeline: PipelineConfig,
    pub cache: CacheConfig,
}

/// Device enumeration timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Pause before the very first enumeration after startup
    pub startup_delay_ms: u64,
    /// Pause before every enumeration pass
    pub enumerate_pause_ms: u64,
    /// Probe-by-index fallback tries indices `0..fallback_max_index`
    pub fallback_max_index: u32,
}

/// Capability probe settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Open attempts before a probe reports the device busy
    pub open_attempts: u32,
    /// Settle delay slept before every open attempt, in milliseconds
    pub settle_delay_ms: u64,
    /// Formats tried, in priority order
    pub formats: Vec<FormatTag>,
    /// Resolutions tried per format, largest first
    pub resolutions: Vec<[u32; 2]>,
}

/// Capture session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Open attempts per channel on start
    pub open_attempts: u32,
    /// Delay between failed open attempts, in milliseconds
    pub retry_delay_ms: u64,
    /// Window after a toggle during which further toggles are ignored
    pub toggle_cooldown_ms: u64,
    /// Wait after stopping all sessions before a forced rescan enumerates
    pub rescan_settle_ms: u64,
}

/// Frame pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Scheduler tick interval in milliseconds
    pub tick_interval_ms: u64,
    /// Surfaces with either side at or below this are not laid out yet
    pub min_surface_dim: u32,
    /// Letterbox fill colour
    pub background: [u8; 3],
}

/// Capability cache location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub path: PathBuf,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            startup_delay_ms: 800,
            enumerate_pause_ms: 200,
            fallback_max_index: 10,
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            open_attempts: MAX_OPEN_ATTEMPTS,
            settle_delay_ms: 500,
            formats: vec![FormatTag::Mjpg, FormatTag::Yuy2],
            resolutions: vec![[1920, 1080], [1280, 720], [800, 600]],
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            open_attempts: MAX_OPEN_ATTEMPTS,
            retry_delay_ms: 300,
            toggle_cooldown_ms: 200,
            rescan_settle_ms: 500,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 30,
            min_surface_dim: 10,
            background: [0, 0, 0],
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("cam_config.json"),
        }
    }
}

impl ProbeConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// The probe matrix in test order: format-major, then resolution as listed.
    pub fn candidate_modes(&self) -> Vec<ModeDescriptor> {
        self.formats
            .iter()
            .filter(|f| **f != FormatTag::Default)
            .flat_map(|format| {
                self.resolutions
                    .iter()
                    .filter_map(move |[w, h]| ModeDescriptor::new(*format, *w, *h).ok())
            })
            .collect()
    }
}

impl SessionConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn toggle_cooldown(&self) -> Duration {
        Duration::from_millis(self.toggle_cooldown_ms)
    }

    pub fn rescan_settle(&self) -> Duration {
        Duration::from_millis(self.rescan_settle_ms)
    }
}

impl PipelineConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl CatalogConfig {
    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    pub fn enumerate_pause(&self) -> Duration {
        Duration::from_millis(self.enumerate_pause_ms)
    }
}

impl MultiCamConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, CameraError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| CameraError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: MultiCamConfig = toml::from_str(&contents)
            .map_err(|e| CameraError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate().map_err(CameraError::ConfigError)?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), CameraError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                CameraError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| CameraError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| CameraError::ConfigError(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("multicam.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        for (what, attempts) in [
            ("probe", self.probe.open_attempts),
            ("session", self.session.open_attempts),
        ] {
            if attempts == 0 || attempts > MAX_OPEN_ATTEMPTS {
                return Err(format!(
                    "{} open attempts must be between 1 and {}",
                    what, MAX_OPEN_ATTEMPTS
                ));
            }
        }

        if self.probe.candidate_modes().is_empty() {
            return Err("Probe matrix is empty (need at least one format and resolution)".into());
        }
        if self.probe.resolutions.iter().any(|[w, h]| *w == 0 || *h == 0) {
            return Err("Probe resolutions must be positive".to_string());
        }

        if self.pipeline.tick_interval_ms == 0 {
            return Err("Tick interval must be at least 1 ms".to_string());
        }

        if self.catalog.fallback_max_index == 0 {
            return Err("Fallback index range must cover at least one device".to_string());
        }

        if self.cache.path.as_os_str().is_empty() {
            return Err("Cache path must not be empty".to_string());
        }

        Ok(())
    }

    /// Defaults with every delay set to zero, for driving the system
    /// against in-memory backends.
    pub fn without_delays() -> Self {
        let mut config = Self::default();
        config.catalog.startup_delay_ms = 0;
        config.catalog.enumerate_pause_ms = 0;
        config.probe.settle_delay_ms = 0;
        config.session.retry_delay_ms = 0;
        config.session.toggle_cooldown_ms = 0;
        config.session.rescan_settle_ms = 0;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MultiCamConfig::default();
        assert_eq!(config.probe.open_attempts, 3);
        assert_eq!(config.probe.settle_delay_ms, 500);
        assert_eq!(config.session.retry_delay_ms, 300);
        assert_eq!(config.pipeline.tick_interval_ms, 30);
        assert_eq!(config.cache.path, PathBuf::from("cam_config.json"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_candidate_modes_order() {
        let modes: Vec<String> = ProbeConfig::default()
            .candidate_modes()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            modes,
            vec![
                "MJPG 1920x1080",
                "MJPG 1280x720",
                "MJPG 800x600",
                "YUY2 1920x1080",
                "YUY2 1280x720",
                "YUY2 800x600",
            ]
        );
    }

    #[test]
    fn test_config_validation() {
        let mut bad = MultiCamConfig::default();
        bad.probe.open_attempts = 4;
        assert!(bad.validate().is_err());

        let mut bad = MultiCamConfig::default();
        bad.session.open_attempts = 0;
        assert!(bad.validate().is_err());

        let mut bad = MultiCamConfig::default();
        bad.probe.formats.clear();
        assert!(bad.validate().is_err());

        let mut bad = MultiCamConfig::default();
        bad.probe.resolutions.push([0, 480]);
        assert!(bad.validate().is_err());

        let mut bad = MultiCamConfig::default();
        bad.pipeline.tick_interval_ms = 0;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("multicam.toml");

        let mut config = MultiCamConfig::default();
        config.session.retry_delay_ms = 450;
        config.cache.path = PathBuf::from("/tmp/elsewhere.json");
        config.save_to_file(&path).unwrap();

        let loaded = MultiCamConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.session.retry_delay_ms, 450);
        assert_eq!(loaded.cache.path, PathBuf::from("/tmp/elsewhere.json"));
        assert_eq!(loaded.probe.formats, vec![FormatTag::Mjpg, FormatTag::Yuy2]);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: MultiCamConfig = toml::from_str("[session]\nopen_attempts = 2\n").unwrap();
        assert_eq!(config.session.open_attempts, 2);
        assert_eq!(config.session.retry_delay_ms, 300);
        assert_eq!(config.probe.settle_delay_ms, 500);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("multicam.toml");
        fs::write(&path, "[probe]\nopen_attempts = 9\n").unwrap();
        assert!(matches!(
            MultiCamConfig::load_from_file(&path),
            Err(CameraError::ConfigError(_))
        ));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = MultiCamConfig::load_from_file("nonexistent_multicam.toml");
        assert_eq!(result.unwrap().pipeline.min_surface_dim, 10);
    }
}
