//! Configuration loading for the stage controller.
//!
//! Configuration is layered with Figment:
//! 1. Built-in defaults (matching the reference hardware: two Thorlabs
//!    K-Cube DC servos, 0-50 mm travel, 60 s motion timeouts, 250 ms
//!    status polling).
//! 2. `xystage.toml` (or an explicit path).
//! 3. Environment variables prefixed with `XYSTAGE_`.
//!
//! # Environment variable overrides
//!
//! Double underscore separates nesting levels so field names may themselves
//! contain underscores:
//!
//! ```text
//! XYSTAGE_APPLICATION__LOG_LEVEL=debug
//! XYSTAGE_X__SERIAL=27750395
//! XYSTAGE_Y__RANGE_MAX_MM=25.0
//! ```

use crate::hardware::AxisId;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "xystage.toml";

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration load error: {0}")]
    Load(#[from] figment::Error),
    #[error("configuration validation error: {0}")]
    Validation(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Application settings.
    #[serde(default)]
    pub application: ApplicationConfig,
    /// X axis (columns) device settings.
    pub x: AxisSettings,
    /// Y axis (rows) device settings.
    pub y: AxisSettings,
}

/// Application-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name, used in log output.
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
        }
    }
}

/// Per-axis device configuration. Immutable for the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxisSettings {
    /// Device serial number.
    pub serial: String,
    /// Serial port path for the controller cube. When unset, the driver
    /// derives the usual Kinesis USB device path from the serial number.
    #[serde(default)]
    pub port: Option<String>,
    /// Lower soft limit in millimeters.
    #[serde(default)]
    pub range_min_mm: f64,
    /// Upper soft limit in millimeters.
    #[serde(default = "default_range_max")]
    pub range_max_mm: f64,
    /// Homing timeout in milliseconds.
    #[serde(default = "default_motion_timeout")]
    pub home_timeout_ms: u64,
    /// Absolute-move timeout in milliseconds.
    #[serde(default = "default_motion_timeout")]
    pub move_timeout_ms: u64,
    /// Device status polling interval in milliseconds.
    #[serde(default = "default_polling_interval")]
    pub polling_interval_ms: u64,
}

impl AxisSettings {
    /// Whether `target_mm` lies within this axis's soft limits.
    pub fn contains(&self, target_mm: f64) -> bool {
        target_mm.is_finite() && target_mm >= self.range_min_mm && target_mm <= self.range_max_mm
    }

    pub fn home_timeout(&self) -> Duration {
        Duration::from_millis(self.home_timeout_ms)
    }

    pub fn move_timeout(&self) -> Duration {
        Duration::from_millis(self.move_timeout_ms)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }
}

fn default_app_name() -> String {
    "xy-stage".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_range_max() -> f64 {
    50.0
}

fn default_motion_timeout() -> u64 {
    60_000
}

fn default_polling_interval() -> u64 {
    250
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            application: ApplicationConfig::default(),
            x: AxisSettings {
                serial: "27750395".to_string(),
                port: None,
                range_min_mm: 0.0,
                range_max_mm: default_range_max(),
                home_timeout_ms: default_motion_timeout(),
                move_timeout_ms: default_motion_timeout(),
                polling_interval_ms: default_polling_interval(),
            },
            y: AxisSettings {
                serial: "27600149".to_string(),
                port: None,
                range_min_mm: 0.0,
                range_max_mm: default_range_max(),
                home_timeout_ms: default_motion_timeout(),
                move_timeout_ms: default_motion_timeout(),
                polling_interval_ms: default_polling_interval(),
            },
        }
    }
}

impl StageConfig {
    /// Load configuration from defaults, `xystage.toml`, and the
    /// environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Path::new(DEFAULT_CONFIG_FILE))
    }

    /// Load configuration with an explicit TOML file path. The file is
    /// optional; defaults and environment variables still apply.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let config: StageConfig = Figment::from(Serialized::defaults(StageConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("XYSTAGE_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Settings for one axis.
    pub fn axis(&self, id: AxisId) -> &AxisSettings {
        match id {
            AxisId::X => &self.x,
            AxisId::Y => &self.y,
        }
    }

    /// Shared timeout for joint operations: the longer of the two axes'
    /// configured timeouts, so neither axis is cut short.
    pub fn joint_home_timeout(&self) -> Duration {
        Duration::from_millis(self.x.home_timeout_ms.max(self.y.home_timeout_ms))
    }

    /// Shared timeout for joint moves.
    pub fn joint_move_timeout(&self) -> Duration {
        Duration::from_millis(self.x.move_timeout_ms.max(self.y.move_timeout_ms))
    }

    /// Semantic validation beyond what serde can express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (id, axis) in [(AxisId::X, &self.x), (AxisId::Y, &self.y)] {
            if axis.serial.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "axis {id}: device serial must not be empty"
                )));
            }
            if !axis.range_min_mm.is_finite() || !axis.range_max_mm.is_finite() {
                return Err(ConfigError::Validation(format!(
                    "axis {id}: range limits must be finite"
                )));
            }
            if axis.range_min_mm >= axis.range_max_mm {
                return Err(ConfigError::Validation(format!(
                    "axis {id}: range_min_mm ({}) must be below range_max_mm ({})",
                    axis.range_min_mm, axis.range_max_mm
                )));
            }
            if axis.home_timeout_ms == 0 || axis.move_timeout_ms == 0 {
                return Err(ConfigError::Validation(format!(
                    "axis {id}: motion timeouts must be positive"
                )));
            }
            if axis.polling_interval_ms == 0 {
                return Err(ConfigError::Validation(format!(
                    "axis {id}: polling interval must be positive"
                )));
            }
        }
        Ok(())
    }
}
