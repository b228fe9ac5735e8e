use anyhow::{anyhow, Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;

use wapi_bridge::wapi::polling::DEFAULT_POLL_INTERVAL;
use wapi_bridge::wapi::DEFAULT_SCRIPT_TIMEOUT;

/// Settings for the bridge binary.
///
/// Read from `config.json` in the config directory, then overridden by
/// `WAPI_*` environment variables and finally by command-line flags.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    /// DevTools WebSocket URL of the WhatsApp Web page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub devtools_url: Option<String>,
    /// Capability bundle to inject instead of the embedded one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_path: Option<PathBuf>,
    pub script_timeout_secs: u64,
    pub poll_interval_secs: u64,
    /// Where image messages are saved; nothing is saved when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_dir: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            devtools_url: None,
            bundle_path: None,
            script_timeout_secs: DEFAULT_SCRIPT_TIMEOUT.as_secs(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
            media_dir: None,
        }
    }
}

impl BridgeConfig {
    pub fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.script_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Applies `WAPI_*` environment overrides
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("WAPI_DEVTOOLS_URL") {
            self.devtools_url = Some(url);
        }
        if let Some(path) = lookup("WAPI_BUNDLE") {
            self.bundle_path = Some(PathBuf::from(path));
        }
        if let Some(secs) = lookup("WAPI_SCRIPT_TIMEOUT") {
            self.script_timeout_secs = secs
                .parse()
                .with_context(|| format!("WAPI_SCRIPT_TIMEOUT is not a number: {}", secs))?;
        }
        if let Some(secs) = lookup("WAPI_POLL_INTERVAL") {
            self.poll_interval_secs = secs
                .parse()
                .with_context(|| format!("WAPI_POLL_INTERVAL is not a number: {}", secs))?;
        }
        if let Some(path) = lookup("WAPI_MEDIA_DIR") {
            self.media_dir = Some(PathBuf::from(path));
        }
        Ok(())
    }
}

pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow!("Could not determine config directory"))?
        .join("wapi-bridge");

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Loads the config file, falling back to defaults when there is none
pub fn load_config(path: Option<&Path>) -> Result<BridgeConfig> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => get_config_dir()?.join("config.json"),
    };

    if !config_path.exists() {
        info!("No config at {}, using defaults", config_path.display());
        return Ok(BridgeConfig::default());
    }

    let file = File::open(&config_path)
        .with_context(|| format!("Failed to open {}", config_path.display()))?;
    let config: BridgeConfig = serde_json::from_reader(file)
        .with_context(|| format!("Invalid config in {}", config_path.display()))?;
    info!("Loaded config from {}", config_path.display());

    Ok(config)
}

pub fn save_config(config: &BridgeConfig, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, config)?;

    info!("Config saved to {}", path.display());
    Ok(())
}
