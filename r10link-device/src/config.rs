//! Device configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via R10LINK_CONFIG)
//! 3. Environment variables

use crate::service::ShotConditions;
use r10link_protocol::{ChecksumPolicy, MAX_CHUNK_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Device configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Framing configuration.
    pub protocol: ProtocolConfig,
    /// Bounded waits.
    pub timeouts: TimeoutConfig,
    /// Launch monitor session behavior.
    pub monitor: MonitorConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("R10LINK_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.protocol.apply_env_overrides();
        self.timeouts.apply_env_overrides();
        self.monitor.apply_env_overrides();
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.protocol.validate()?;
        self.timeouts.validate()
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Framing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Frame bytes per BLE write, excluding the header byte.
    pub max_chunk_size: usize,
    /// Disposition of frames failing the CRC check.
    pub checksum_policy: ChecksumPolicy,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: MAX_CHUNK_SIZE,
            checksum_policy: ChecksumPolicy::Drop,
        }
    }
}

impl ProtocolConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(size) = std::env::var("R10LINK_MAX_CHUNK_SIZE") {
            if let Ok(n) = size.parse() {
                self.max_chunk_size = n;
            }
        }

        if let Ok(policy) = std::env::var("R10LINK_CHECKSUM_POLICY") {
            self.checksum_policy = match policy.to_lowercase().as_str() {
                "deliver" => ChecksumPolicy::Deliver,
                _ => ChecksumPolicy::Drop,
            };
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_chunk_size == 0 || self.max_chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "max_chunk_size must be between 1 and {}",
                MAX_CHUNK_SIZE
            )));
        }
        Ok(())
    }
}

/// Bounded waits, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Handshake completion wait.
    pub handshake_ms: u64,
    /// Correlated request wait.
    pub request_ms: u64,
    /// Idle wait of each pipeline worker.
    pub idle_wait_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            handshake_ms: 10_000,
            request_ms: 5_000,
            idle_wait_ms: 5_000,
        }
    }
}

impl TimeoutConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(ms) = std::env::var("R10LINK_HANDSHAKE_TIMEOUT_MS") {
            if let Ok(n) = ms.parse() {
                self.handshake_ms = n;
            }
        }

        if let Ok(ms) = std::env::var("R10LINK_REQUEST_TIMEOUT_MS") {
            if let Ok(n) = ms.parse() {
                self.request_ms = n;
            }
        }

        if let Ok(ms) = std::env::var("R10LINK_IDLE_WAIT_MS") {
            if let Ok(n) = ms.parse() {
                self.idle_wait_ms = n;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.handshake_ms == 0 || self.request_ms == 0 || self.idle_wait_ms == 0 {
            return Err(ConfigError::ValidationError(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn handshake(&self) -> Duration {
        Duration::from_millis(self.handshake_ms)
    }

    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }
}

/// Launch monitor session behavior.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Wake the device whenever it reports standby.
    pub auto_wake: bool,
    /// Start a tilt calibration during setup.
    pub calibrate_tilt_on_connect: bool,
    /// Conditions sent with the shot configuration during setup.
    pub shot: ShotConditions,
}

impl MonitorConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(wake) = std::env::var("R10LINK_AUTO_WAKE") {
            self.auto_wake = wake == "1" || wake.to_lowercase() == "true";
        }

        if let Ok(calibrate) = std::env::var("R10LINK_CALIBRATE_TILT") {
            self.calibrate_tilt_on_connect = calibrate == "1" || calibrate.to_lowercase() == "true";
        }

        let overrides: [(&str, &mut f32); 5] = [
            ("R10LINK_TEMPERATURE", &mut self.shot.temperature),
            ("R10LINK_HUMIDITY", &mut self.shot.humidity),
            ("R10LINK_ALTITUDE", &mut self.shot.altitude),
            ("R10LINK_AIR_DENSITY", &mut self.shot.air_density),
            ("R10LINK_TEE_DISTANCE_FT", &mut self.shot.tee_distance_ft),
        ];
        for (name, field) in overrides {
            if let Ok(value) = std::env::var(name) {
                if let Ok(parsed) = value.parse() {
                    *field = parsed;
                }
            }
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
