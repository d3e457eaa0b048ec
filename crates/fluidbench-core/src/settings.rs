//! Persisted serial settings
//!
//! A single JSON object on disk holding the serial parameters and the device
//! address last used. An absent file yields the defaults; a corrupt file is
//! a recoverable load error that callers resolve by falling back to the
//! defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::protocol::{DataBits, FlowControl, Parity, SerialConfig, StopBits};

/// File name of the persisted settings record
pub const SETTINGS_FILE_NAME: &str = "serial_settings.json";

fn default_port() -> String {
    "COM3".to_string()
}

fn default_baudrate() -> u32 {
    9600
}

fn default_databits() -> u8 {
    8
}

fn default_parity() -> String {
    "N".to_string()
}

fn default_stopbits() -> f64 {
    1.0
}

fn default_flowcontrol() -> String {
    "N".to_string()
}

fn default_device_address() -> String {
    "1".to_string()
}

/// The persisted settings record
///
/// Fields are kept loosely typed to match the on-disk format; unknown or
/// out-of-range values degrade to 8/N/1/N when mapped onto a
/// [`SerialConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Serial port name
    #[serde(default = "default_port")]
    pub port: String,
    /// Baud rate
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,
    /// Data bits (5-8)
    #[serde(default = "default_databits")]
    pub databits: u8,
    /// Parity letter ("N"/"E"/"O")
    #[serde(default = "default_parity")]
    pub parity: String,
    /// Stop bits (1, 1.5 or 2)
    #[serde(default = "default_stopbits")]
    pub stopbits: f64,
    /// Flow control letter ("N"/"H"/"S")
    #[serde(default = "default_flowcontrol")]
    pub flowcontrol: String,
    /// Device address for the pump protocol
    #[serde(default = "default_device_address")]
    pub device_address: String,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            baudrate: default_baudrate(),
            databits: default_databits(),
            parity: default_parity(),
            stopbits: default_stopbits(),
            flowcontrol: default_flowcontrol(),
            device_address: default_device_address(),
        }
    }
}

/// Errors raised while loading or saving settings
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to access settings file {path}: {source}")]
    Io {
        /// File that was being accessed
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    #[error("settings file {path} is not valid JSON: {source}")]
    Parse {
        /// File that failed to parse
        path: PathBuf,
        /// Underlying JSON error
        source: serde_json::Error,
    },
}

impl SerialSettings {
    /// Default on-disk location under the user configuration directory
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fluidbench")
            .join(SETTINGS_FILE_NAME)
    }

    /// Load settings from `path`; an absent file yields the defaults
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = serde_json::from_str(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "loaded serial settings");
        Ok(settings)
    }

    /// Load settings, falling back to the defaults on any error
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "failed to load serial settings, using defaults");
                Self::default()
            }
        }
    }

    /// Persist the settings, creating parent directories as needed
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| SettingsError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }
        let text = serde_json::to_string_pretty(self).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, text).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "saved serial settings");
        Ok(())
    }

    /// Map the loose record onto a typed connection configuration
    pub fn to_config(&self) -> SerialConfig {
        SerialConfig {
            port: self.port.clone(),
            baud_rate: self.baudrate,
            data_bits: DataBits::from_number(self.databits),
            parity: Parity::from_letter(&self.parity),
            stop_bits: StopBits::from_number(self.stopbits),
            flow_control: FlowControl::from_letter(&self.flowcontrol),
        }
    }
}
