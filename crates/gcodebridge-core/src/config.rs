//! Configuration for the GCodeBridge proxy
//!
//! Provides configuration file handling and validation. Supports JSON and
//! TOML files with kebab-case keys, organized into logical sections:
//! - Server settings (bind address, port, queue limit)
//! - Device settings (selection, baud rate, timing)
//! - Custom trigger rules
//!
//! Precedence is CLI arguments over file values over defaults; the CLI layer
//! applies its overrides after [`Config::load_from_file`].

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Default location of the configuration file
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gcodebridge")
        .join("config.toml")
}

/// TCP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ServerConfig {
    /// Address to bind the listener to
    pub address: String,
    /// Port to listen on
    pub port: u16,
    /// Capacity of the device submission queue
    pub queue_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 8080,
            queue_limit: 50,
        }
    }
}

/// Serial device settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DeviceConfig {
    /// USB device ID in vendor:product format (mutually exclusive with dev-path)
    pub usb_id: Option<String>,
    /// Device path like /dev/ttyACM0 (mutually exclusive with usb-id)
    pub dev_path: Option<String>,
    /// Serial baud rate
    pub baud_rate: u32,
    /// Post-open quiescence window in milliseconds
    pub serial_delay: u64,
    /// Interval between `?` liveness probes in milliseconds; 0 disables probing
    pub liveness_period: u64,
    /// Suppress `ok` responses produced by `?` probes
    pub swallow_realtime_ok: bool,
    /// Per-command response deadline in milliseconds
    pub response_timeout: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            usb_id: None,
            dev_path: None,
            baud_rate: 115_200,
            serial_delay: 100,
            liveness_period: 1000,
            swallow_realtime_ok: true,
            response_timeout: 5000,
        }
    }
}

/// The matching half of a custom trigger entry
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct TriggerMatchConfig {
    /// Trigger type; only "gcode" is recognised
    #[serde(rename = "type")]
    pub kind: String,
    /// Regular expression matched against the stripped GCode line
    #[serde(rename = "match")]
    pub pattern: String,
}

/// A single custom trigger entry
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct TriggerConfig {
    /// Identifier, unique within the rule set
    pub id: String,
    /// Match settings
    pub trigger: TriggerMatchConfig,
    /// Shell command executed when the pattern matches
    pub command: String,
}

/// Complete proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    /// TCP server settings
    pub server: ServerConfig,
    /// Serial device settings
    pub device: DeviceConfig,
    /// Optional path of the GCode traffic log file
    pub gcode_log_file: Option<PathBuf>,
    /// Custom trigger rules, evaluated in order
    pub custom_triggers: Vec<TriggerConfig>,
}

impl Config {
    /// Create a config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load config from a JSON or TOML file
    ///
    /// The result is not yet validated; call [`Config::validate`] after the
    /// CLI layer has applied its overrides.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        let config: Self = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?
        } else {
            return Err(ConfigError::UnsupportedFormat {
                path: path.display().to_string(),
            }
            .into());
        };

        Ok(config)
    }

    /// Save config to a JSON or TOML file, creating parent directories
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?
        } else {
            return Err(ConfigError::UnsupportedFormat {
                path: path.display().to_string(),
            }
            .into());
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Validate the merged configuration
    ///
    /// `dry_run` relaxes the device-selection requirement, since the
    /// synthetic transport needs no hardware.
    pub fn validate(&self, dry_run: bool) -> Result<()> {
        let usb_id_set = self
            .device
            .usb_id
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty());
        let dev_path_set = self
            .device
            .dev_path
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty());

        if usb_id_set && dev_path_set {
            return Err(ConfigError::DeviceConflict.into());
        }
        if !usb_id_set && !dev_path_set && !dry_run {
            return Err(ConfigError::DeviceNotSpecified.into());
        }

        if self.device.baud_rate == 0 {
            return Err(ConfigError::InvalidValue {
                option: "device.baud-rate".to_string(),
                reason: "must be > 0".to_string(),
            }
            .into());
        }

        if self.server.queue_limit == 0 {
            return Err(ConfigError::InvalidValue {
                option: "server.queue-limit".to_string(),
                reason: "must be > 0".to_string(),
            }
            .into());
        }

        if self.device.response_timeout == 0 {
            return Err(ConfigError::InvalidValue {
                option: "device.response-timeout".to_string(),
                reason: "must be > 0".to_string(),
            }
            .into());
        }

        self.validate_triggers()?;

        Ok(())
    }

    /// Check shape of every trigger entry
    ///
    /// Regex compilation happens in the trigger engine; this pass rejects
    /// entries whose required fields are missing or whose type is unknown,
    /// and duplicate ids.
    fn validate_triggers(&self) -> Result<()> {
        let mut seen: HashSet<&str> = HashSet::new();

        for entry in &self.custom_triggers {
            let id = entry.id.trim();
            if id.is_empty() {
                return Err(ConfigError::InvalidTrigger {
                    id: "<unnamed>".to_string(),
                    reason: "'id' is required".to_string(),
                }
                .into());
            }
            if !seen.insert(id) {
                return Err(ConfigError::InvalidTrigger {
                    id: id.to_string(),
                    reason: "duplicate id".to_string(),
                }
                .into());
            }
            if entry.trigger.kind.trim() != "gcode" {
                return Err(ConfigError::InvalidTrigger {
                    id: id.to_string(),
                    reason: format!("unsupported trigger type: '{}'", entry.trigger.kind),
                }
                .into());
            }
            if entry.trigger.pattern.trim().is_empty() {
                return Err(ConfigError::InvalidTrigger {
                    id: id.to_string(),
                    reason: "'trigger.match' pattern is required".to_string(),
                }
                .into());
            }
            if entry.command.trim().is_empty() {
                return Err(ConfigError::InvalidTrigger {
                    id: id.to_string(),
                    reason: "'command' is required".to_string(),
                }
                .into());
            }
        }

        Ok(())
    }
}
