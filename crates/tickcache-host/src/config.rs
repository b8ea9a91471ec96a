//! Application configuration management.
//!
//! Holds the API endpoint, an optional API key, the frame rate of the
//! update loop and per-cache settings.
//!
//! Configuration is stored at `~/.config/tickcache/config.json`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use tickcache_core::{Interval, ServiceConfiguration};

use crate::api::client::DEFAULT_API_BASE_URL;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "tickcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Roughly 60 frames per second
const DEFAULT_FRAME_INTERVAL_MS: u64 = 16;

/// Item snapshots older than a week are refetched
const ITEM_SNAPSHOT_MAX_AGE_MINS: u64 = 7 * 24 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub api_key: Option<String>,
    pub frame_interval_ms: u64,
    /// Item ids the item cache keeps.
    pub tracked_items: Vec<u32>,
    pub services: ServicesConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub account: ServiceConfiguration,
    pub worldbosses: ServiceConfiguration,
    pub items: ServiceConfiguration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_key: None,
            frame_interval_ms: DEFAULT_FRAME_INTERVAL_MS,
            tracked_items: Vec::new(),
            services: ServicesConfig::default(),
        }
    }
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            account: ServiceConfiguration::default()
                .with_permissions(["account"])
                .awaiting_load(),
            worldbosses: ServiceConfiguration::default()
                .with_permissions(["account", "progression"])
                .with_update_interval(Interval::from_mins(5)),
            items: ServiceConfiguration {
                max_snapshot_age: Some(Interval::from_mins(ITEM_SNAPSHOT_MAX_AGE_MINS)),
                ..ServiceConfiguration::default()
            }
            .with_update_interval(Interval::Never),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}
