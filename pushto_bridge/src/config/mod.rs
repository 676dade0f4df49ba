// config.rs

use pushto_core::{AngleUnit, LinkSettings, ObserverLocation};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

const APP_NAME: &str = "pushto";
const CONFIG_FILE_NAME: &str = "config.json";

pub fn default_config_path() -> PathBuf {
    let mut dir = dirs_next::config_dir().unwrap_or_else(|| {
        dirs_next::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
    });
    dir.push(APP_NAME);
    dir.push(CONFIG_FILE_NAME);
    dir
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

impl From<&Location> for ObserverLocation {
    fn from(location: &Location) -> Self {
        ObserverLocation {
            latitude: location.latitude,
            longitude: location.longitude,
            altitude: location.altitude,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Port opened at start-up. `None` disables auto-reconnect.
    pub reconnect_port: Option<String>,
    pub location: Location,
    pub link: LinkSettings,
    /// Unit of the angles the controller reports.
    pub inbound_unit: AngleUnit,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reconnect_port: None,
            location: Location {
                latitude: 45.503575,
                longitude: -73.587090,
                altitude: 100.0,
            },
            link: LinkSettings::default(),
            inbound_unit: AngleUnit::default(),
        }
    }
}

impl Config {
    /// Load from `path`, or return default if missing
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let raw = fs::read_to_string(path)?;
            let cfg = serde_json::from_str(&raw)?;
            Ok(cfg)
        } else {
            Ok(Config::default())
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)?;
        Ok(())
    }

    /// Remembers `port` for the next start, or forgets it with `None`.
    /// Empty names count as `None`.
    pub fn set_reconnect_port(&mut self, port: Option<String>) {
        self.reconnect_port = port.filter(|name| !name.trim().is_empty());
    }

    pub fn observer_location(&self) -> ObserverLocation {
        ObserverLocation::from(&self.location)
    }
}
