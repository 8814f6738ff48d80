//! Configuration management for picamstream
//!
//! Loads and saves the capture settings, reconnect policy, stream tuning and
//! backend list from a TOML file.

use crate::backend::KNOWN_BACKENDS;
use crate::errors::CameraError;
use crate::session::SessionTiming;
use crate::types::{CaptureConfig, Resolution};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub camera: CameraConfig,
    pub reconnect: ReconnectConfig,
    pub stream: StreamTuning,
    pub backends: BackendsConfig,
}

/// Capture parameters passed to whichever backend opens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Requested resolution [width, height]
    pub resolution: [u32; 2],
    pub framerate: u32,
    /// Clockwise rotation in degrees (0, 90, 180 or 270)
    pub rotation: u32,
    pub hflip: bool,
    pub vflip: bool,
    /// Index of the capture device for V4L2 / generic backends
    pub device_index: u32,
}

/// Auto-reconnect policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Consecutive read failures before reconnecting
    pub error_threshold: u32,
    /// Delay between closing the old backend and selecting a new one
    pub reconnect_delay_ms: u64,
    /// Delay between failed reconnect attempts
    pub backoff_ms: u64,
}

/// Production loop and teardown tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamTuning {
    /// Sleep per frame for backends that do not block on read
    pub pacing_ms: u64,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
    pub join_timeout_ms: u64,
    pub capture_timeout_ms: u64,
}

/// Backends to register, in the order they are listed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendsConfig {
    pub enabled: Vec<String>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                resolution: [1280, 720],
                framerate: 30,
                rotation: 0,
                hflip: false,
                vflip: false,
                device_index: 0,
            },
            reconnect: ReconnectConfig {
                error_threshold: 10,
                reconnect_delay_ms: 1000,
                backoff_ms: 1000,
            },
            stream: StreamTuning {
                pacing_ms: 30,
                jpeg_quality: 85,
                join_timeout_ms: 1000,
                capture_timeout_ms: 5000,
            },
            backends: BackendsConfig {
                enabled: KNOWN_BACKENDS.iter().map(|s| s.to_string()).collect(),
            },
        }
    }
}

impl StreamConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, CameraError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|e| {
            CameraError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        let config: StreamConfig = toml::from_str(&contents).map_err(|e| {
            CameraError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        config.validate().map_err(CameraError::ConfigError)?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), CameraError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    CameraError::ConfigError(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let toml_string = toml::to_string_pretty(self).map_err(|e| {
            CameraError::ConfigError(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(path, toml_string).map_err(|e| {
            CameraError::ConfigError(format!("Failed to write config file: {}", e))
        })?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from("picamstream.toml")
    }

    /// Load from default location, falling back to defaults on any error
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        let [width, height] = self.camera.resolution;
        if width == 0 || height == 0 {
            return Err("Invalid resolution".to_string());
        }
        if self.camera.framerate == 0 || self.camera.framerate > 240 {
            return Err("Invalid framerate (must be 1-240)".to_string());
        }
        if !matches!(self.camera.rotation, 0 | 90 | 180 | 270) {
            return Err("Rotation must be 0, 90, 180 or 270".to_string());
        }

        if self.reconnect.error_threshold == 0 {
            return Err("Error threshold must be at least 1".to_string());
        }

        if self.stream.jpeg_quality == 0 || self.stream.jpeg_quality > 100 {
            return Err("JPEG quality must be between 1 and 100".to_string());
        }
        if self.stream.join_timeout_ms == 0 {
            return Err("Join timeout must be positive".to_string());
        }

        if self.backends.enabled.is_empty() {
            return Err("At least one backend must be enabled".to_string());
        }
        if let Some(unknown) = self
            .backends
            .enabled
            .iter()
            .find(|id| !KNOWN_BACKENDS.contains(&id.as_str()))
        {
            return Err(format!("Unknown backend '{}'", unknown));
        }

        Ok(())
    }

    /// Parameters for `CameraSession::open`
    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            resolution: Resolution::new(self.camera.resolution[0], self.camera.resolution[1]),
            framerate: self.camera.framerate,
            rotation: self.camera.rotation,
            hflip: self.camera.hflip,
            vflip: self.camera.vflip,
            device_index: self.camera.device_index,
        }
    }

    pub fn session_timing(&self) -> SessionTiming {
        SessionTiming {
            error_threshold: self.reconnect.error_threshold,
            reconnect_delay: Duration::from_millis(self.reconnect.reconnect_delay_ms),
            backoff: Duration::from_millis(self.reconnect.backoff_ms),
            pacing: Duration::from_millis(self.stream.pacing_ms),
            join_timeout: Duration::from_millis(self.stream.join_timeout_ms),
            capture_timeout: Duration::from_millis(self.stream.capture_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StreamConfig::default();
        assert_eq!(config.camera.resolution, [1280, 720]);
        assert_eq!(config.camera.framerate, 30);
        assert_eq!(config.reconnect.error_threshold, 10);
        assert_eq!(config.stream.jpeg_quality, 85);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut bad = StreamConfig::default();
        bad.camera.resolution = [0, 0];
        assert!(bad.validate().is_err());

        let mut bad = StreamConfig::default();
        bad.camera.rotation = 45;
        assert!(bad.validate().is_err());

        let mut bad = StreamConfig::default();
        bad.backends.enabled.push("picamera".to_string());
        assert!(bad.validate().unwrap_err().contains("picamera"));

        let mut bad = StreamConfig::default();
        bad.stream.jpeg_quality = 0;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_timing_matches_config() {
        let timing = StreamConfig::default().session_timing();
        assert_eq!(timing, SessionTiming::default());
    }

    #[test]
    fn test_capture_config_conversion() {
        let mut config = StreamConfig::default();
        config.camera.rotation = 180;
        config.camera.vflip = true;
        let capture = config.capture_config();
        assert_eq!(capture.resolution, Resolution::new(1280, 720));
        assert_eq!(capture.rotation, 180);
        assert!(capture.vflip);
    }

    #[test]
    fn test_config_toml_format() {
        let toml_string = toml::to_string_pretty(&StreamConfig::default()).unwrap();
        assert!(toml_string.contains("[camera]"));
        assert!(toml_string.contains("[reconnect]"));
        assert!(toml_string.contains("[stream]"));
        assert!(toml_string.contains("[backends]"));
        assert!(toml_string.contains("error_threshold"));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = StreamConfig::load_from_file("nonexistent_picamstream.toml");
        assert_eq!(result.unwrap().camera.framerate, 30);
    }
}
