//! Instrument configuration
//!
//! Describes which motor controllers the instrument has and which motor
//! sits on which controller axis. Supports JSON and TOML files, selected
//! by file extension.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use credo_core::router::RouterConfig;
use credo_core::ConfigError;

use crate::driver::DriverModel;

/// One motor controller card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Controller instance name, referenced by motors
    pub name: String,
    /// Card model
    pub model: DriverModel,
}

/// One motor on a controller axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotorConfig {
    /// Motor name, unique across the instrument
    pub name: String,
    /// Name of the controller driving this motor
    pub controller: String,
    /// Axis index on the controller
    pub index: u32,
    /// Left soft limit
    #[serde(default = "default_soft_left")]
    pub soft_left: f64,
    /// Right soft limit
    #[serde(default = "default_soft_right")]
    pub soft_right: f64,
    /// Position at startup
    #[serde(default)]
    pub position: f64,
}

fn default_soft_left() -> f64 {
    -100.0
}

fn default_soft_right() -> f64 {
    100.0
}

impl MotorConfig {
    fn new(name: &str, controller: &str, index: u32) -> Self {
        Self {
            name: name.to_string(),
            controller: controller.to_string(),
            index,
            soft_left: default_soft_left(),
            soft_right: default_soft_right(),
            position: 0.0,
        }
    }
}

/// Complete instrument configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// Router settings used for every controller and device
    #[serde(default)]
    pub router: RouterConfig,
    /// Motor controller cards
    pub controllers: Vec<ControllerConfig>,
    /// Motors
    pub motors: Vec<MotorConfig>,
}

impl Default for InstrumentConfig {
    /// The CREDO layout: two three-axis cards and one six-axis card
    fn default() -> Self {
        let controller = |name: &str, model| ControllerConfig {
            name: name.to_string(),
            model,
        };
        Self {
            router: RouterConfig::default(),
            controllers: vec![
                controller("tmcm351a", DriverModel::Tmcm351),
                controller("tmcm351b", DriverModel::Tmcm351),
                controller("tmcm6110", DriverModel::Tmcm6110),
            ],
            motors: vec![
                MotorConfig::new("Unknown1", "tmcm351a", 0),
                MotorConfig::new("Sample_X", "tmcm351a", 1),
                MotorConfig::new("Sample_Y", "tmcm351a", 2),
                MotorConfig::new("PH1X", "tmcm6110", 0),
                MotorConfig::new("PH1Y", "tmcm6110", 1),
                MotorConfig::new("PH2X", "tmcm6110", 2),
                MotorConfig::new("PH2Y", "tmcm6110", 3),
                MotorConfig::new("PH3X", "tmcm6110", 4),
                MotorConfig::new("PH3Y", "tmcm6110", 5),
                MotorConfig::new("BeamStop_X", "tmcm351b", 0),
                MotorConfig::new("BeamStop_Y", "tmcm351b", 1),
                MotorConfig::new("Unknown2", "tmcm351b", 2),
            ],
        }
    }
}

impl InstrumentConfig {
    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;

        let config: Self = match Format::of(path)? {
            Format::Json => serde_json::from_str(&content).map_err(|e| ConfigError::Invalid {
                reason: format!("Invalid JSON config: {}", e),
            })?,
            Format::Toml => toml::from_str(&content).map_err(|e| ConfigError::Invalid {
                reason: format!("Invalid TOML config: {}", e),
            })?,
        };

        config.validate()?;
        tracing::info!(
            path = %path.display(),
            controllers = config.controllers.len(),
            motors = config.motors.len(),
            "Instrument configuration loaded"
        );
        Ok(config)
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;

        let content = match Format::of(path)? {
            Format::Json => {
                serde_json::to_string_pretty(self).map_err(|e| ConfigError::Invalid {
                    reason: format!("Failed to serialize config: {}", e),
                })?
            }
            Format::Toml => toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid {
                reason: format!("Failed to serialize config: {}", e),
            })?,
        };

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Find a controller by name
    pub fn controller(&self, name: &str) -> Option<&ControllerConfig> {
        self.controllers.iter().find(|c| c.name == name)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.router.validate()?;

        let mut controller_names = HashSet::new();
        for controller in &self.controllers {
            if !controller_names.insert(controller.name.as_str()) {
                return Err(invalid(
                    "controllers",
                    format!("duplicate controller '{}'", controller.name),
                ));
            }
        }

        let mut motor_names = HashSet::new();
        let mut axes = HashSet::new();
        for motor in &self.motors {
            let key = format!("motors.{}", motor.name);
            if !motor_names.insert(motor.name.as_str()) {
                return Err(invalid(&key, "duplicate motor name".to_string()));
            }
            let controller = self.controller(&motor.controller).ok_or_else(|| {
                invalid(&key, format!("unknown controller '{}'", motor.controller))
            })?;
            if motor.index >= controller.model.axis_count() {
                return Err(invalid(
                    &key,
                    format!(
                        "index {} out of range for {} ({} axes)",
                        motor.index,
                        controller.model,
                        controller.model.axis_count()
                    ),
                ));
            }
            if !axes.insert((motor.controller.as_str(), motor.index)) {
                return Err(invalid(
                    &key,
                    format!("axis {}#{} already assigned", motor.controller, motor.index),
                ));
            }
            if motor.soft_left >= motor.soft_right {
                return Err(invalid(&key, "soft_left must be < soft_right".to_string()));
            }
            if motor.position < motor.soft_left || motor.position > motor.soft_right {
                return Err(invalid(
                    &key,
                    "position must lie within the soft limits".to_string(),
                ));
            }
        }

        Ok(())
    }
}

fn invalid(key: &str, reason: String) -> ConfigError {
    ConfigError::InvalidSetting {
        key: key.to_string(),
        reason,
    }
}

enum Format {
    Json,
    Toml,
}

impl Format {
    fn of(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Format::Json),
            Some("toml") => Ok(Format::Toml),
            _ => Err(ConfigError::UnsupportedFormat {
                path: path.display().to_string(),
            }),
        }
    }
}
