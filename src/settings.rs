//! Persisted controller preferences
//!
//! One small TOML file under the platform config dir: the remembered device
//! address, the preferred transport selector, and the optional origin base.
//! Settings are never fatal; a missing or broken file falls back to defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::constants::config;

/// Transport selector: resolved per call, `auto` picks for you
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommsMode {
    #[default]
    Auto,
    Serial,
    Http,
}

impl CommsMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommsMode::Auto => "auto",
            CommsMode::Serial => "serial",
            CommsMode::Http => "http",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(CommsMode::Auto),
            "serial" => Some(CommsMode::Serial),
            "http" => Some(CommsMode::Http),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Remembered device network address, bare host or host:port
    #[serde(default)]
    pub device_addr: Option<String>,

    #[serde(default)]
    pub comms_mode: CommsMode,

    /// Base URL standing in for a hosting page's origin; used as an HTTP
    /// candidate under the secure-origin guard, and again as the relative
    /// fallback
    #[serde(default)]
    pub origin: Option<String>,
}

impl Settings {
    fn config_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(config::APP_DIR);
        path.push(config::FILENAME);
        path
    }

    pub fn load() -> Self {
        let path = Self::config_path();
        let Ok(contents) = fs::read_to_string(&path) else {
            return Self::default();
        };
        match toml::from_str(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to parse settings file, using defaults");
                Self::default()
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .context(format!("Failed to create config directory: {}", parent.display()))?;
        }
        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize settings to TOML")?;
        fs::write(&path, contents)
            .context(format!("Failed to write settings file to {}", path.display()))?;
        Ok(())
    }

    /// Persist a discovered device address for future candidate walks
    pub fn remember_device(&mut self, addr: &str) {
        if self.device_addr.as_deref() == Some(addr) {
            return;
        }
        self.device_addr = Some(addr.to_string());
        info!(addr = %addr, "Remembering device address");
        if let Err(e) = self.save() {
            warn!(error = %e, "Failed to persist device address");
        }
    }

    /// Persist the transport selector
    pub fn set_comms_mode(&mut self, mode: CommsMode) -> Result<()> {
        self.comms_mode = mode;
        self.save()
    }
}
